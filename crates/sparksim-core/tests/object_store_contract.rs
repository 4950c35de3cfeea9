//! Proves the object-store message variants round-trip through the bus
//! deterministically, even though no object-store handler ships in this
//! crate. The core only needs to carry these variants faithfully; an
//! external collaborator supplies the real backend.

use std::cell::RefCell;
use std::rc::Rc;

use sparksim_core::{BusContext, Endpoint, Envelope, Handler, Message, MessageBus, NetworkConfig};

struct FakeObjectStore;

impl Handler for FakeObjectStore {
    fn handle(&mut self, envelope: &Envelope, ctx: &mut BusContext<'_>) {
        match &envelope.message {
            Message::PutObject { key, .. } => {
                ctx.send_correlated(
                    Message::PutObjectResponse {
                        correlation_id: key.clone(),
                        success: true,
                        error: None,
                    },
                    envelope.destination.clone(),
                    envelope.source.clone(),
                    Some(key.clone()),
                );
            }
            Message::GetObject { key } => {
                ctx.send_correlated(
                    Message::GetObjectResponse {
                        correlation_id: key.clone(),
                        success: true,
                        data: Some(b"hello".to_vec()),
                        error: None,
                    },
                    envelope.destination.clone(),
                    envelope.source.clone(),
                    Some(key.clone()),
                );
            }
            Message::GetObjectSize { key } => {
                ctx.send_correlated(
                    Message::GetObjectSizeResponse {
                        correlation_id: key.clone(),
                        success: true,
                        size: Some(5),
                        error: None,
                    },
                    envelope.destination.clone(),
                    envelope.source.clone(),
                    Some(key.clone()),
                );
            }
            other => panic!("unexpected message in fixture: {other:?}"),
        }
    }
}

struct Recorder {
    received: Rc<RefCell<Vec<(Message, Option<String>)>>>,
}

impl Handler for Recorder {
    fn handle(&mut self, envelope: &Envelope, _ctx: &mut BusContext<'_>) {
        self.received
            .borrow_mut()
            .push((envelope.message.clone(), envelope.correlation_id.clone()));
    }
}

fn no_fault_network() -> NetworkConfig {
    NetworkConfig {
        seed: 1,
        min_latency_ticks: 0,
        max_latency_ticks: 0,
        drop_probability: 0.0,
        reorder: false,
        partitioned_pairs: Default::default(),
    }
}

#[test]
fn put_get_and_size_round_trip_with_matching_correlation_ids() {
    let mut bus = MessageBus::new(no_fault_network()).unwrap();
    let store_ep = Endpoint::new("store", 1);
    let client_ep = Endpoint::new("client", 1);
    let received = Rc::new(RefCell::new(Vec::new()));

    bus.register(store_ep.clone(), FakeObjectStore);
    bus.register(
        client_ep.clone(),
        Recorder {
            received: Rc::clone(&received),
        },
    );

    bus.send(
        Message::PutObject {
            key: "k1".into(),
            data: b"payload".to_vec(),
        },
        client_ep.clone(),
        store_ep.clone(),
    );
    bus.send(Message::GetObject { key: "k2".into() }, client_ep.clone(), store_ep.clone());
    bus.send(
        Message::GetObjectSize { key: "k3".into() },
        client_ep,
        store_ep,
    );

    // Requests land on the store this tick; its responses become eligible
    // for delivery on the next one.
    bus.tick();
    bus.tick();

    let seen = received.borrow();
    assert_eq!(seen.len(), 3);
    for (message, correlation_id) in seen.iter() {
        match message {
            Message::PutObjectResponse { success, .. } => {
                assert!(*success);
                assert_eq!(correlation_id.as_deref(), Some("k1"));
            }
            Message::GetObjectResponse { success, data, .. } => {
                assert!(*success);
                assert_eq!(data.as_deref(), Some(b"hello".as_slice()));
                assert_eq!(correlation_id.as_deref(), Some("k2"));
            }
            Message::GetObjectSizeResponse { success, size, .. } => {
                assert!(*success);
                assert_eq!(*size, Some(5));
                assert_eq!(correlation_id.as_deref(), Some("k3"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}

#[test]
fn determinism_holds_across_repeated_runs() {
    let run = || {
        let mut bus = MessageBus::new(no_fault_network()).unwrap();
        let store_ep = Endpoint::new("store", 1);
        let client_ep = Endpoint::new("client", 1);
        bus.register(store_ep.clone(), FakeObjectStore);
        bus.send(Message::GetObject { key: "a".into() }, client_ep, store_ep);
        bus.tick();
        bus.pending_len()
    };
    assert_eq!(run(), run());
}
