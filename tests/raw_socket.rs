//! Raw SocketCAN tests. The end-to-end test needs a virtual interface:
//!
//! ```text
//! sudo ip link add dev vcan0 type vcan && sudo ip link set up vcan0
//! cargo test --test raw_socket -- --ignored
//! ```

use canbridge::{CanEndpoint, Channel, ChannelState, Frame, RawSocket};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::task::LocalSet;

#[test]
fn test_missing_interface_is_setup_error() {
    let err = Channel::open("nosuchcan0", false).unwrap_err();
    assert!(err.is_setup());
    assert!(matches!(err, canbridge::Error::NoSuchInterface(_)));
}

#[test]
#[ignore = "needs vcan0"]
fn test_raw_socket_close_unblocks_receive() {
    let socket = std::sync::Arc::new(RawSocket::open("vcan0", false).unwrap());
    let rx = socket.clone();
    let handle = std::thread::spawn(move || rx.receive_blocking());

    std::thread::sleep(Duration::from_millis(50));
    socket.close();
    assert!(matches!(handle.join().unwrap(), Err(canbridge::Error::Closed)));
}

#[tokio::test]
#[ignore = "needs vcan0"]
async fn test_vcan_end_to_end() {
    LocalSet::new()
        .run_until(async {
            let receiver = Channel::open("vcan0", true).unwrap();
            let sender = Channel::open("vcan0", false).unwrap();

            let frames = Rc::new(RefCell::new(Vec::new()));
            let sink = frames.clone();
            receiver.add_listener(move |event| {
                if let Some(frame) = event.frame() {
                    sink.borrow_mut().push(*frame);
                }
            });
            receiver.start_local().unwrap();
            sender.start_local().unwrap();

            sender.send(&Frame::new(0x123, &[0x01, 0x02]).unwrap()).unwrap();

            let deadline = Instant::now() + Duration::from_secs(2);
            while frames.borrow().is_empty() && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let frame = frames.borrow()[0];
            assert_eq!(frame.id(), 0x123);
            assert_eq!(frame.data(), &[0x01, 0x02]);
            assert!(frame.timestamp().is_some());

            let started = Instant::now();
            receiver.stop().unwrap();
            sender.stop().unwrap();
            assert!(started.elapsed() < Duration::from_secs(1));
            assert_eq!(receiver.state(), ChannelState::Stopped);
        })
        .await;
}
