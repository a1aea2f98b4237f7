use super::traits::CanEndpoint;
use crate::codec::{CanFilter, Frame, Timestamp, filter::{any_match, validate_filters}};
use crate::error::{Error, Result};

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

/// In-memory CAN bus.
///
/// Every [`LoopbackEndpoint`] opened on the bus sees the frames the others
/// send, filtered the way the kernel filters a raw socket. Endpoints do not
/// receive their own transmissions. Error frames bypass id filters.
#[derive(Clone)]
pub struct VirtualBus {
    shared: Arc<BusShared>,
}

struct BusShared {
    name: String,
    ports: Mutex<Vec<Weak<Port>>>,
    next_port: AtomicUsize,
    tx_blocked: AtomicBool,
}

struct Port {
    id: usize,
    state: Mutex<PortState>,
    ready: Condvar,
}

struct PortState {
    queue: VecDeque<Frame>,
    filters: Vec<CanFilter>,
    closed: bool,
    fault: Option<io::ErrorKind>,
    timestamps: bool,
}

impl VirtualBus {
    pub fn new(name: &str) -> Self {
        VirtualBus {
            shared: Arc::new(BusShared {
                name: name.to_string(),
                ports: Mutex::new(Vec::new()),
                next_port: AtomicUsize::new(0),
                tx_blocked: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Attach a new endpoint. Like a fresh socket it accepts every frame.
    pub fn open(&self, with_timestamps: bool) -> LoopbackEndpoint {
        let port = Arc::new(Port {
            id: self.shared.next_port.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(PortState {
                queue: VecDeque::new(),
                filters: vec![CanFilter::accept_all()],
                closed: false,
                fault: None,
                timestamps: with_timestamps,
            }),
            ready: Condvar::new(),
        });
        lock(&self.shared.ports).push(Arc::downgrade(&port));
        LoopbackEndpoint {
            bus: self.shared.clone(),
            port,
        }
    }

    pub fn endpoint(&self) -> LoopbackEndpoint {
        self.open(false)
    }

    /// While set, every send on the bus fails with `Error::WouldBlock`,
    /// like a socket whose transmit queue is full.
    pub fn set_tx_blocked(&self, blocked: bool) {
        self.shared.tx_blocked.store(blocked, Ordering::SeqCst);
    }

    /// Number of endpoints still attached.
    pub fn endpoint_count(&self) -> usize {
        let mut ports = lock(&self.shared.ports);
        ports.retain(|p| p.strong_count() > 0);
        ports.len()
    }
}

impl BusShared {
    fn broadcast(&self, from: usize, frame: &Frame) {
        let ports: Vec<Arc<Port>> = {
            let mut ports = lock(&self.ports);
            ports.retain(|p| p.strong_count() > 0);
            ports.iter().filter_map(Weak::upgrade).collect()
        };
        for port in ports.iter().filter(|p| p.id != from) {
            port.deliver(*frame);
        }
    }
}

impl Port {
    fn deliver(&self, frame: Frame) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        if !frame.is_error_frame() && !any_match(&state.filters, &frame) {
            return false;
        }
        let frame = if state.timestamps {
            frame.with_timestamp(Timestamp::now())
        } else {
            frame
        };
        state.queue.push_back(frame);
        self.ready.notify_one();
        true
    }
}

/// One endpoint on a [`VirtualBus`].
pub struct LoopbackEndpoint {
    bus: Arc<BusShared>,
    port: Arc<Port>,
}

impl LoopbackEndpoint {
    /// Deliver `frame` to this endpoint as if it arrived from the bus.
    /// Returns `false` when the frame was dropped by the filters or the
    /// endpoint is closed.
    pub fn inject(&self, frame: Frame) -> bool {
        self.port.deliver(frame)
    }

    /// Simulate a hardware fault: once the frames already queued have been
    /// received, `receive_blocking` fails with an I/O error of `kind`.
    pub fn fail(&self, kind: io::ErrorKind) {
        let mut state = lock(&self.port.state);
        state.fault = Some(kind);
        self.port.ready.notify_all();
    }

    /// Frames queued and not yet received.
    pub fn pending(&self) -> usize {
        lock(&self.port.state).queue.len()
    }
}

impl CanEndpoint for LoopbackEndpoint {
    fn interface(&self) -> &str {
        &self.bus.name
    }

    fn set_filters(&self, filters: &[CanFilter]) -> Result<()> {
        validate_filters(filters)?;
        let mut state = lock(&self.port.state);
        if state.closed {
            return Err(Error::Closed);
        }
        state.filters = filters.to_vec();
        Ok(())
    }

    fn send(&self, frame: &Frame) -> Result<()> {
        if lock(&self.port.state).closed {
            return Err(Error::Closed);
        }
        if self.bus.tx_blocked.load(Ordering::SeqCst) {
            return Err(Error::WouldBlock);
        }
        self.bus.broadcast(self.port.id, frame);
        Ok(())
    }

    fn receive_blocking(&self) -> Result<Frame> {
        let mut state = lock(&self.port.state);
        loop {
            if state.closed {
                return Err(Error::Closed);
            }
            if let Some(frame) = state.queue.pop_front() {
                return Ok(frame);
            }
            if let Some(kind) = state.fault {
                return Err(Error::Io(io::Error::new(kind, "simulated bus fault")));
            }
            state = self
                .port
                .ready
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn close(&self) {
        let mut state = lock(&self.port.state);
        if state.closed {
            return;
        }
        state.closed = true;
        state.queue.clear();
        self.port.ready.notify_all();
    }

    fn is_open(&self) -> bool {
        !lock(&self.port.state).closed
    }

    fn timestamps_enabled(&self) -> bool {
        lock(&self.port.state).timestamps
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_send_reaches_peers_only() {
        let bus = VirtualBus::new("vbus0");
        let a = bus.endpoint();
        let b = bus.endpoint();

        let frame = Frame::new(0x123, &[1, 2]).unwrap();
        a.send(&frame).unwrap();

        assert_eq!(b.receive_blocking().unwrap(), frame);
        assert_eq!(a.pending(), 0);
    }

    #[test]
    fn test_filters_replace_wholesale() {
        let bus = VirtualBus::new("vbus0");
        let rx = bus.endpoint();

        rx.set_filters(&[CanFilter::exact(0x100, false)]).unwrap();
        rx.set_filters(&[CanFilter::exact(0x200, false)]).unwrap();

        assert!(!rx.inject(Frame::new(0x100, &[]).unwrap()));
        assert!(rx.inject(Frame::new(0x200, &[]).unwrap()));

        rx.set_filters(&[]).unwrap();
        assert!(!rx.inject(Frame::new(0x200, &[]).unwrap()));
        assert_eq!(rx.pending(), 1);
    }

    #[test]
    fn test_close_unblocks_receiver() {
        let bus = VirtualBus::new("vbus0");
        let rx = Arc::new(bus.endpoint());

        let rx_thread = {
            let rx = rx.clone();
            thread::spawn(move || rx.receive_blocking())
        };

        thread::sleep(Duration::from_millis(50));
        rx.close();
        rx.close();

        let result = rx_thread.join().unwrap();
        assert!(matches!(result, Err(Error::Closed)));
        assert!(!rx.is_open());
        assert!(matches!(rx.send(&Frame::new(1, &[]).unwrap()), Err(Error::Closed)));
    }

    #[test]
    fn test_fault_after_queued_frames() {
        let bus = VirtualBus::new("vbus0");
        let rx = bus.endpoint();

        rx.inject(Frame::new(0x1, &[]).unwrap());
        rx.fail(io::ErrorKind::BrokenPipe);

        assert_eq!(rx.receive_blocking().unwrap().id(), 0x1);
        match rx.receive_blocking() {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected I/O error, got {:?}", other),
        }
    }

    #[test]
    fn test_tx_blocked() {
        let bus = VirtualBus::new("vbus0");
        let tx = bus.endpoint();
        bus.set_tx_blocked(true);
        assert!(matches!(tx.send(&Frame::new(1, &[]).unwrap()), Err(Error::WouldBlock)));
        bus.set_tx_blocked(false);
        assert!(tx.send(&Frame::new(1, &[]).unwrap()).is_ok());
    }

    #[test]
    fn test_timestamps() {
        let bus = VirtualBus::new("vbus0");
        let rx = bus.open(true);
        assert!(rx.timestamps_enabled());
        rx.inject(Frame::new(0x1, &[]).unwrap());
        assert!(rx.receive_blocking().unwrap().timestamp().is_some());
    }

    #[test]
    fn test_dropped_endpoints_detach() {
        let bus = VirtualBus::new("vbus0");
        let a = bus.endpoint();
        {
            let _b = bus.endpoint();
            assert_eq!(bus.endpoint_count(), 2);
        }
        assert_eq!(bus.endpoint_count(), 1);
        a.send(&Frame::new(1, &[]).unwrap()).unwrap();
    }
}
