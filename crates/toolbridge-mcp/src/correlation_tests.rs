use super::*;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};

/// Records written lines; never produces input.
#[derive(Default)]
struct MockTransport {
    written: parking_lot::Mutex<Vec<String>>,
    broken: AtomicBool,
    stalled: AtomicBool,
}

impl MockTransport {
    fn lines(&self) -> Vec<Value> {
        self.written
            .lock()
            .iter()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            )));
        }
        self.written.lock().push(line.to_string());
        Ok(())
    }

    async fn read_line(&self, _timeout: Option<Duration>) -> Result<String, TransportError> {
        Err(TransportError::Closed)
    }

    async fn terminate(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

fn setup() -> (Arc<MockTransport>, Correlator) {
    let transport = Arc::new(MockTransport::default());
    let correlator = Correlator::new(transport.clone());
    (transport, correlator)
}

fn ok(id: u64, result: Value) -> Envelope {
    RpcResponse::new(id, result).into()
}

const LONG: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_ids_start_at_one_and_increase() {
    let (transport, correlator) = setup();

    let mut previous = 0;
    for _ in 0..10 {
        let id = correlator.submit("tools/list", None).await.unwrap();
        assert!(id > previous);
        previous = id;
    }

    let ids: Vec<u64> = transport
        .lines()
        .iter()
        .map(|l| l["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_request_wire_format() {
    let (transport, correlator) = setup();
    let params = json!({"name": "subnet_calculator", "arguments": {"cidr": "10.0.0.0/8"}});
    correlator.submit("tools/call", Some(params)).await.unwrap();

    let line = &transport.lines()[0];
    assert_eq!(line["jsonrpc"], "2.0");
    assert_eq!(line["id"], 1);
    assert_eq!(line["method"], "tools/call");
    assert_eq!(line["params"]["arguments"]["cidr"], "10.0.0.0/8");
}

#[tokio::test]
async fn test_interleaved_responses_match_by_id() {
    let (_transport, correlator) = setup();
    let a = correlator.submit("tools/call", None).await.unwrap();
    let b = correlator.submit("tools/call", None).await.unwrap();
    let c = correlator.submit("tools/call", None).await.unwrap();

    correlator.dispatch(ok(c, json!("c")));
    correlator.dispatch(ok(b, json!("b")));
    correlator.dispatch(ok(a, json!("a")));

    assert_eq!(correlator.await_response(a, LONG).await.unwrap(), json!("a"));
    assert_eq!(correlator.await_response(c, LONG).await.unwrap(), json!("c"));
    assert_eq!(correlator.await_response(b, LONG).await.unwrap(), json!("b"));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn test_waiter_is_woken_by_dispatch() {
    let (_transport, correlator) = setup();
    let correlator = Arc::new(correlator);
    let id = correlator.submit("tools/list", None).await.unwrap();

    let waiter = {
        let correlator = correlator.clone();
        tokio::spawn(async move { correlator.await_response(id, LONG).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    correlator.dispatch(ok(id, json!({"tools": []})));

    let result = waiter.await.unwrap().unwrap();
    assert_eq!(result, json!({"tools": []}));
}

#[tokio::test]
async fn test_notification_registers_nothing() {
    let (transport, correlator) = setup();

    correlator.notify("notifications/initialized", None).await.unwrap();
    assert_eq!(correlator.pending_count(), 0);
    let sent = &transport.lines()[0];
    assert!(sent.get("id").is_none());

    let id = correlator.submit("tools/list", None).await.unwrap();
    assert_eq!(id, 1, "notifications do not consume ids");
    correlator.dispatch(RpcNotification::new("notifications/message").into());
    correlator.dispatch(ok(id, json!(1)));
    assert_eq!(correlator.await_response(id, LONG).await.unwrap(), json!(1));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_at_deadline() {
    let (_transport, correlator) = setup();
    let id = correlator.submit("tools/call", None).await.unwrap();

    let start = tokio::time::Instant::now();
    let err = correlator
        .await_response(id, Duration::from_millis(200))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, BridgeError::Timeout { id: 1, timeout_ms: 200, .. }));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(250));
}

#[tokio::test]
async fn test_timeout_leaves_call_pending_for_retry() {
    let (_transport, correlator) = setup();
    let id = correlator.submit("tools/call", None).await.unwrap();

    let err = correlator
        .await_response(id, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }));
    assert!(correlator.is_pending(id));

    correlator.dispatch(ok(id, json!("late but claimed")));
    assert_eq!(
        correlator.await_response(id, LONG).await.unwrap(),
        json!("late but claimed")
    );
}

#[tokio::test]
async fn test_abandoned_call_discards_late_reply() {
    let (_transport, correlator) = setup();
    let id = correlator.submit("tools/call", None).await.unwrap();

    assert!(correlator.abandon(id));
    assert!(!correlator.abandon(id));
    correlator.dispatch(ok(id, json!("too late")));

    assert_eq!(correlator.pending_count(), 0);
    assert!(matches!(
        correlator.await_response(id, LONG).await,
        Err(BridgeError::UnknownRequest { id: 1 })
    ));

    let next = correlator.submit("tools/call", None).await.unwrap();
    assert_eq!(next, id + 1);
}

#[tokio::test]
async fn test_request_abandons_on_timeout() {
    let (_transport, correlator) = setup();
    let err = correlator
        .request("tools/list", None, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn test_error_response_is_remote_error() {
    let (_transport, correlator) = setup();
    let id = correlator.submit("tools/call", None).await.unwrap();

    let error = RpcError::new(-32000, "device unreachable").with_data(json!("r1"));
    correlator.dispatch(RpcErrorResponse::new(id, error).into());

    match correlator.await_response(id, LONG).await {
        Err(BridgeError::Remote { code, message, data }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "device unreachable");
            assert_eq!(data, Some(json!("r1")));
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_response_keeps_first() {
    let (_transport, correlator) = setup();
    let id = correlator.submit("tools/call", None).await.unwrap();

    correlator.dispatch(ok(id, json!("first")));
    correlator.dispatch(ok(id, json!("second")));

    assert_eq!(correlator.await_response(id, LONG).await.unwrap(), json!("first"));
}

#[tokio::test]
async fn test_string_id_response_is_discarded() {
    let (_transport, correlator) = setup();
    let id = correlator.submit("tools/call", None).await.unwrap();
    correlator.dispatch(RpcResponse::new("1", json!("wrong")).into());
    assert!(correlator.is_pending(id));
    assert!(matches!(
        correlator.await_response(id, Duration::from_millis(10)).await,
        Err(BridgeError::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_write_failure_unregisters_and_keeps_ids_unique() {
    let (transport, correlator) = setup();
    transport.broken.store(true, Ordering::SeqCst);

    let err = correlator.submit("tools/list", None).await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(TransportError::Io(_))));
    assert_eq!(correlator.pending_count(), 0);

    transport.broken.store(false, Ordering::SeqCst);
    assert_eq!(correlator.submit("tools/list", None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_fail_all_resolves_waiters_and_blocks_submits() {
    let (_transport, correlator) = setup();
    let correlator = Arc::new(correlator);
    let id = correlator.submit("tools/call", None).await.unwrap();

    let waiter = {
        let correlator = correlator.clone();
        tokio::spawn(async move { correlator.await_response(id, LONG).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    correlator.fail_all(Shutdown::Closed);

    assert!(matches!(waiter.await.unwrap(), Err(BridgeError::SessionClosed)));
    assert!(matches!(
        correlator.submit("tools/list", None).await,
        Err(BridgeError::SessionClosed)
    ));
    assert!(matches!(
        correlator.notify("notifications/initialized", None).await,
        Err(BridgeError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_fail_all_transport_lost() {
    let (_transport, correlator) = setup();
    let id = correlator.submit("tools/call", None).await.unwrap();
    correlator.fail_all(Shutdown::TransportLost);

    let err = correlator.await_response(id, LONG).await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(TransportError::Closed)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_fail_all_keeps_already_buffered_results() {
    let (_transport, correlator) = setup();
    let id = correlator.submit("tools/call", None).await.unwrap();
    correlator.dispatch(ok(id, json!("done")));
    correlator.fail_all(Shutdown::TransportLost);

    assert_eq!(correlator.await_response(id, LONG).await.unwrap(), json!("done"));
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let (transport, correlator) = setup();
    correlator.dispatch(RpcRequest::new("srv-1", "ping").into());
    correlator.dispatch(RpcRequest::new(9u64, "sampling/createMessage").into());

    // Replies go out from their own tasks, in no particular order.
    let lines = tokio::time::timeout(LONG, async {
        loop {
            let lines = transport.lines();
            if lines.len() == 2 {
                return lines;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let ping = lines.iter().find(|l| l["id"] == "srv-1").unwrap();
    assert_eq!(ping["result"], json!({}));
    let refused = lines.iter().find(|l| l["id"] == 9).unwrap();
    assert_eq!(refused["error"]["code"], -32601);
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_write_times_out_and_shuts_down() {
    let (transport, correlator) = setup();
    transport.stalled.store(true, Ordering::SeqCst);

    let limit = Duration::from_millis(200);
    let err = correlator
        .submit_within("tools/call", None, limit)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Transport(TransportError::WriteTimeout { timeout_ms: 200 })
    ));
    assert!(err.is_fatal());
    assert_eq!(correlator.pending_count(), 0);

    transport.stalled.store(false, Ordering::SeqCst);
    let err = correlator.submit("tools/list", None).await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(TransportError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_notify_is_bounded() {
    let transport = Arc::new(MockTransport::default());
    transport.stalled.store(true, Ordering::SeqCst);
    let correlator =
        Correlator::new(transport.clone()).with_write_timeout(Duration::from_millis(50));

    let err = correlator
        .notify("notifications/initialized", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Transport(TransportError::WriteTimeout { timeout_ms: 50 })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_reply_does_not_block_routing() {
    let (transport, correlator) = setup();
    let id = correlator.submit("tools/call", None).await.unwrap();

    transport.stalled.store(true, Ordering::SeqCst);
    correlator.dispatch(RpcRequest::new("srv-1", "ping").into());
    correlator.dispatch(ok(id, json!("routed")));

    assert_eq!(correlator.await_response(id, LONG).await.unwrap(), json!("routed"));
}

#[tokio::test]
async fn test_concurrent_submitters_get_unique_ids() {
    let (_transport, correlator) = setup();
    let correlator = Arc::new(correlator);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let correlator = correlator.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..25 {
                ids.push(correlator.submit("tools/call", None).await.unwrap());
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 200);
    assert_eq!(all.first(), Some(&1));
    assert_eq!(all.last(), Some(&200));
}
