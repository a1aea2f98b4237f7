use canbridge::database::{CanAdapter, NetworkDescription, Update};
use canbridge::{CanEndpoint, Channel, Frame, VirtualBus};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::LocalSet;

const NETWORK: &str = r#"{
    "buses": {
        "comfort": {
            "messages": [
                {
                    "name": "Climate",
                    "id": "0x3A0",
                    "length": 4,
                    "signals": [
                        { "name": "Fan", "bitOffset": 0, "bitLength": 4 },
                        { "name": "Target", "bitOffset": 8, "bitLength": 16, "factor": 0.1, "offset": -40 }
                    ]
                },
                {
                    "name": "Seat",
                    "id": "0x18FF0001",
                    "format": "extended",
                    "signals": [
                        { "name": "Heat", "bitOffset": 0, "bitLength": 8, "endianess": "big", "type": "signed" }
                    ]
                }
            ]
        }
    }
}"#;

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    true
}

#[tokio::test]
async fn test_adapter_decodes_bus_traffic() {
    LocalSet::new()
        .run_until(async {
            let network: NetworkDescription = NETWORK.parse().unwrap();
            let bus = VirtualBus::new("vbus0");
            let channel = Channel::with_endpoint(Arc::new(bus.endpoint()));
            let adapter = CanAdapter::with_channel(channel, &network, "comfort").unwrap();

            let updates = Rc::new(RefCell::new(Vec::new()));
            let sink = updates.clone();
            adapter
                .register_listener("Climate.Target", move |update| {
                    if let Update::Signal(s) = update {
                        sink.borrow_mut().push(s.value());
                    }
                })
                .unwrap();
            let messages = Rc::new(RefCell::new(Vec::new()));
            let sink = messages.clone();
            adapter
                .register_listener("Seat", move |update| {
                    if let Update::Message(m) = update {
                        sink.borrow_mut().push(m.signal("Heat").map(|s| s.value()));
                    }
                })
                .unwrap();

            let peer = bus.endpoint();
            // Target raw 615 -> 21.5
            peer.send(&Frame::new(0x3A0, &[0x03, 0x67, 0x02, 0x00]).unwrap()).unwrap();
            peer.send(&Frame::new_extended(0x18FF0001, &[0xFE]).unwrap()).unwrap();

            assert!(wait_until(|| !updates.borrow().is_empty() && !messages.borrow().is_empty()).await);
            assert!((updates.borrow()[0] - 21.5).abs() < 1e-9);
            assert_eq!(*messages.borrow(), vec![Some(-2.0)]);
            assert_eq!(
                adapter.database().signal("Climate", "Fan").unwrap().value(),
                3.0
            );

            adapter.stop().unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_adapter_sends_signal_values() {
    LocalSet::new()
        .run_until(async {
            let network: NetworkDescription = NETWORK.parse().unwrap();
            let bus = VirtualBus::new("vbus0");
            let channel = Channel::with_endpoint(Arc::new(bus.endpoint()));
            let adapter = CanAdapter::with_channel(channel, &network, "comfort").unwrap();
            let peer = bus.endpoint();

            adapter.update_signal_value("Climate", "Fan", 5.0).unwrap();
            adapter.update_signal_value("Climate", "Target", 21.5).unwrap();
            adapter.send_message("Climate").unwrap();

            let frame = peer.receive_blocking().unwrap();
            assert_eq!(frame.id(), 0x3A0);
            assert_eq!(frame.data(), &[0x05, 0x67, 0x02, 0x00]);

            adapter.update_signal_value("Seat", "Heat", -2.0).unwrap();
            adapter.send_message("Seat").unwrap();
            let frame = peer.receive_blocking().unwrap();
            assert!(frame.is_extended());
            assert_eq!(frame.data(), &[0xFE]);

            adapter.stop().unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_adapter_rejects_unknown_names() {
    LocalSet::new()
        .run_until(async {
            let network: NetworkDescription = NETWORK.parse().unwrap();
            let bus = VirtualBus::new("vbus0");
            let channel = Channel::with_endpoint(Arc::new(bus.endpoint()));
            assert!(CanAdapter::with_channel(channel.clone(), &network, "powertrain").is_err());

            let adapter = CanAdapter::with_channel(channel, &network, "comfort").unwrap();
            assert!(adapter.register_listener("Doors", |_| {}).is_err());
            assert!(adapter.register_listener("Climate.Fan.Speed", |_| {}).is_err());
            assert!(adapter.send_message("Doors").is_err());

            let id = adapter.register_listener("Climate.Fan", |_| {}).unwrap();
            assert!(adapter.unregister_listener(id));
            adapter.stop().unwrap();
        })
        .await;
}

#[test]
fn test_adapter_setup_missing_description() {
    assert!(matches!(
        CanAdapter::setup("/nonexistent/network.json", "vcan0", "comfort"),
        Err(canbridge::DatabaseError::Io(_))
    ));
}
