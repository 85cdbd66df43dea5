//! End-to-end channel scenarios over the in-memory transport.
//!
//! A virtual clock drives every timeout, so these tests run instantly and
//! deterministically.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde_json::{json, Value};
use vws::events::ScopeKey;
use vws::timer::{ManualScheduler, SharedScheduler, TokioScheduler};
use vws::transport::{Connector, MemoryConnector};
use vws::{Channel, ChannelEvent, Client, Config, NotReady, EVENT_MESSAGE, EVENT_OPEN};

const HOST: &str = "ws://example.test/socket";

fn setup() -> (Rc<Channel>, Rc<MemoryConnector>, Rc<ManualScheduler>) {
    let connector = Rc::new(MemoryConnector::new());
    let scheduler = Rc::new(ManualScheduler::new());
    let channel = Channel::new(
        HOST,
        &Config::default(),
        Rc::clone(&connector) as Rc<dyn Connector>,
        Rc::clone(&scheduler) as SharedScheduler,
    );
    (channel, connector, scheduler)
}

#[test]
fn test_request_reply_round_trip() {
    let (channel, connector, _scheduler) = setup();
    channel.open();
    let peer = connector.last().unwrap();
    assert_eq!(peer.host(), HOST);
    peer.open();

    let reply = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&reply);
    assert!(channel.send(
        json!({"payload": "x"}),
        Some(Box::new(move |body: Value| *slot.borrow_mut() = Some(body))),
    ));

    let sent = peer.last_sent_json().unwrap();
    assert_eq!(sent["payload"], json!("x"));
    let id = sent["request_uuid"].as_str().unwrap().to_string();

    peer.message_json(&json!({"request_uuid": id, "response": {"data": "y"}}));

    let reply = reply.borrow();
    let body = reply.as_ref().unwrap();
    assert_eq!(body["response"]["data"], json!("y"));
    assert_eq!(body["request_uuid_handled"], json!(true));
    assert_eq!(body["request_uuid"], json!(id));
}

#[test]
fn test_ready_timeout_leaves_channel_closed() {
    let (channel, connector, scheduler) = setup();
    channel.open();

    let outcome = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&outcome);
    channel.ready(move |result| *slot.borrow_mut() = Some(result));

    scheduler.advance(Duration::from_millis(3000));
    assert_eq!(*outcome.borrow(), Some(Err(NotReady::Timeout)));
    assert!(!channel.initialized());

    // Recovers with a fresh transport
    channel.open();
    assert_eq!(connector.connection_count(), 2);
    connector.last().unwrap().open();
    assert!(channel.active());
}

#[test]
fn test_correlation_timeout_drops_callback() {
    let (channel, connector, scheduler) = setup();
    channel.open();
    let peer = connector.last().unwrap();
    peer.open();

    let called = Rc::new(Cell::new(false));
    let flag = Rc::clone(&called);
    channel.send(json!({"q": 1}), Some(Box::new(move |_| flag.set(true))));
    let id = peer.last_sent_json().unwrap()["request_uuid"].clone();

    scheduler.advance(Duration::from_millis(9_999));
    assert_eq!(channel.pending_requests(), 1);
    scheduler.advance(Duration::from_millis(1));
    assert_eq!(channel.pending_requests(), 0);

    // A late reply is still fanned out, marked, but resolves nothing
    let pushed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&pushed);
    channel.on(&ScopeKey::generate("observer"), EVENT_MESSAGE, move |event: &ChannelEvent| {
        sink.borrow_mut().push(event.clone());
        Ok(())
    });
    peer.message_json(&json!({"request_uuid": id}));

    assert!(!called.get());
    assert_eq!(
        *pushed.borrow(),
        vec![ChannelEvent::Message(json!({
            "request_uuid": id,
            "request_uuid_handled": true
        }))]
    );
}

#[test]
fn test_concurrent_requests_resolve_independently() {
    let (channel, connector, _scheduler) = setup();
    channel.open();
    let peer = connector.last().unwrap();
    peer.open();

    let replies = Rc::new(RefCell::new(Vec::new()));
    for n in 0..3 {
        let replies = Rc::clone(&replies);
        channel.send(
            json!({"n": n}),
            Some(Box::new(move |body: Value| {
                replies.borrow_mut().push((n, body));
            })),
        );
    }
    let sent: Vec<Value> = peer
        .sent()
        .iter()
        .map(|text| serde_json::from_str(text).unwrap())
        .collect();
    assert_eq!(sent.len(), 3);

    // Answer out of order
    for index in [2, 0, 1] {
        peer.message_json(&json!({
            "request_uuid": sent[index]["request_uuid"],
            "echo": sent[index]["n"]
        }));
    }

    let replies = replies.borrow();
    assert_eq!(replies.len(), 3);
    for (n, body) in replies.iter() {
        assert_eq!(body["echo"], json!(n));
    }
}

#[test]
fn test_scoped_subscribers_are_isolated() {
    let (channel, connector, _scheduler) = setup();
    let first = ScopeKey::generate("observer");
    let second = ScopeKey::generate("observer");
    let first_hits = Rc::new(Cell::new(0));
    let second_hits = Rc::new(Cell::new(0));

    for (scope, hits) in [(&first, &first_hits), (&second, &second_hits)] {
        let hits = Rc::clone(hits);
        channel.on(scope, EVENT_OPEN, move |_| {
            hits.set(hits.get() + 1);
            Ok(())
        });
    }

    channel.off(&first, &[EVENT_OPEN]);
    channel.open();
    connector.last().unwrap().open();

    assert_eq!(first_hits.get(), 0);
    assert_eq!(second_hits.get(), 1);
}

#[test]
fn test_client_send_through_facade() {
    let connector = Rc::new(MemoryConnector::new());
    let scheduler = Rc::new(ManualScheduler::new());
    let client = Client::builder(HOST)
        .config(Config::default())
        .connector(Rc::clone(&connector) as Rc<dyn Connector>)
        .scheduler(Rc::clone(&scheduler) as SharedScheduler)
        .build();

    let reply = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&reply);
    client.send(
        json!({"payload": "x"}),
        Some(Box::new(move |body: Value| *slot.borrow_mut() = Some(body))),
    );

    let peer = connector.last().unwrap();
    peer.open();
    assert!(client.is_connected());

    let id = peer.last_sent_json().unwrap()["request_uuid"].clone();
    peer.message_json(&json!({"request_uuid": id, "response": {"data": "y"}}));

    assert_eq!(
        reply.borrow().as_ref().map(|body| body["response"]["data"].clone()),
        Some(json!("y"))
    );
    assert_eq!(client.pending_requests(), 0);
}

#[test]
fn test_client_send_reports_readiness_timeout() {
    let connector = Rc::new(MemoryConnector::new());
    let scheduler = Rc::new(ManualScheduler::new());
    let client = Client::builder(HOST)
        .config(Config {
            ready_timeout_ms: 500,
            ..Config::default()
        })
        .connector(Rc::clone(&connector) as Rc<dyn Connector>)
        .scheduler(Rc::clone(&scheduler) as SharedScheduler)
        .build();

    let reply = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&reply);
    client.send(
        json!({"payload": "x"}),
        Some(Box::new(move |body: Value| *slot.borrow_mut() = Some(body))),
    );

    scheduler.advance(Duration::from_millis(500));
    assert_eq!(
        *reply.borrow(),
        Some(json!({"error": "Channel did not open in time"}))
    );
    assert!(connector.last().unwrap().sent().is_empty());
}

#[tokio::test]
async fn test_tokio_timers_outside_local_set_do_not_panic() {
    let connector = Rc::new(MemoryConnector::new());
    let client = Client::builder(HOST)
        .config(Config::default())
        .connector(Rc::clone(&connector) as Rc<dyn Connector>)
        .scheduler(Rc::new(TokioScheduler::new()) as SharedScheduler)
        .build();

    // Arms an unarmable readiness timer, then a correlation timer
    client.send(json!({"payload": "x"}), Some(Box::new(|_: Value| {})));
    let peer = connector.last().unwrap();
    peer.open();

    assert!(client.is_connected());
    assert_eq!(peer.sent().len(), 1);
    assert_eq!(client.pending_requests(), 1);
}
