use super::config::ChannelConfig;
use super::notifier::Notifier;
use super::receiver::{Inbound, Receiver};
use crate::codec::{CanFilter, Frame};
use crate::error::{Error, Result};
use crate::transport::{CanEndpoint, RawSocket};

use log::{debug, error, info, warn};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};

const LOG_TARGET: &str = "canbridge::channel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Running,
    StopRequested,
    Stopped,
    Failed,
}

/// The receive path ended because of a runtime error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfStream {
    pub interface: String,
    pub kind: Option<io::ErrorKind>,
    pub reason: String,
}

impl EndOfStream {
    fn from_error(interface: &str, err: &Error) -> Self {
        let kind = match err {
            Error::Io(e) => Some(e.kind()),
            _ => None,
        };
        EndOfStream {
            interface: interface.to_string(),
            kind,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Frame(Frame),
    EndOfStream(EndOfStream),
}

impl Event {
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Event::Frame(frame) => Some(frame),
            Event::EndOfStream(_) => None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Event::EndOfStream(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Callback = Rc<RefCell<dyn FnMut(&Event)>>;

struct ListenerEntry {
    id: ListenerId,
    callback: Callback,
}

/// A CAN interface bound to the current single-threaded context.
///
/// Frames are received on a dedicated thread and handed to the owning context
/// through an inbound queue; listeners always run on the thread that owns the
/// channel, in registration order, one frame at a time.
///
/// [`start`](Channel::start) only spawns the receiver thread. Queued frames
/// reach the listeners through one of:
/// - [`start_local`](Channel::start_local), which also spawns the drain task
///   on the current [`tokio::task::LocalSet`];
/// - awaiting [`drain`](Channel::drain) on any single-threaded executor;
/// - calling [`dispatch_pending`](Channel::dispatch_pending) by hand.
///
/// Cloning yields another handle to the same channel. Dropping the last handle
/// stops it.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<Inner>,
}

/// Non-owning handle, for listeners that need to reach their own channel.
#[derive(Clone)]
pub struct WeakChannel {
    inner: Weak<Inner>,
}

struct Inner {
    interface: String,
    endpoint: Arc<dyn CanEndpoint>,
    state: Cell<ChannelState>,
    listeners: RefCell<Vec<ListenerEntry>>,
    next_listener: Cell<u64>,
    stop_flag: Arc<AtomicBool>,
    receiver: RefCell<Option<Receiver>>,
    inbound: RefCell<Option<mpsc::Receiver<Inbound>>>,
    notifier: RefCell<Option<Arc<Notifier>>>,
    dispatching: Cell<bool>,
    stop_deferred: Cell<bool>,
}

impl Channel {
    /// Open a raw CAN socket on `interface`. Receiving starts with [`start`](Channel::start).
    pub fn open(interface: &str, with_timestamps: bool) -> Result<Channel> {
        let socket = RawSocket::open(interface, with_timestamps)?;
        Ok(Channel::with_endpoint(Arc::new(socket)))
    }

    pub fn from_config(config: &ChannelConfig) -> Result<Channel> {
        let channel = Channel::open(&config.interface, config.timestamps)?;
        if let Some(filters) = config.can_filters() {
            channel.set_rx_filters(&filters)?;
        }
        Ok(channel)
    }

    pub fn with_endpoint(endpoint: Arc<dyn CanEndpoint>) -> Channel {
        let interface = endpoint.interface().to_string();
        debug!(target: LOG_TARGET, "{}: channel created", interface);
        Channel {
            inner: Rc::new(Inner {
                interface,
                endpoint,
                state: Cell::new(ChannelState::Created),
                listeners: RefCell::new(Vec::new()),
                next_listener: Cell::new(1),
                stop_flag: Arc::new(AtomicBool::new(false)),
                receiver: RefCell::new(None),
                inbound: RefCell::new(None),
                notifier: RefCell::new(None),
                dispatching: Cell::new(false),
                stop_deferred: Cell::new(false),
            }),
        }
    }

    pub fn interface(&self) -> &str {
        &self.inner.interface
    }

    pub fn state(&self) -> ChannelState {
        self.inner.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.get() == ChannelState::Running
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Append a listener. The same closure logic may be registered more than
    /// once; each registration is invoked separately.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: FnMut(&Event) + 'static,
    {
        let id = ListenerId(self.inner.next_listener.get());
        self.inner.next_listener.set(id.0 + 1);
        self.inner.listeners.borrow_mut().push(ListenerEntry {
            id,
            callback: Rc::new(RefCell::new(callback)),
        });
        id
    }

    /// Takes effect immediately, also for the frame currently being dispatched.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Spawn the receiver thread. Nothing is delivered until the inbound
    /// queue is drained.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        match inner.state.get() {
            ChannelState::Created => {}
            ChannelState::Running | ChannelState::StopRequested => return Err(Error::AlreadyRunning),
            ChannelState::Stopped | ChannelState::Failed => return Err(Error::EndpointInvalid),
        }
        if !inner.endpoint.is_open() {
            return Err(Error::EndpointInvalid);
        }

        let notifier = Arc::new(Notifier::new());
        let (tx, rx) = mpsc::channel();
        let receiver = match Receiver::spawn(
            inner.endpoint.clone(),
            tx,
            notifier.clone(),
            inner.stop_flag.clone(),
        ) {
            Ok(receiver) => receiver,
            Err(e) => {
                notifier.teardown();
                return Err(Error::Spawn(e));
            }
        };

        *inner.receiver.borrow_mut() = Some(receiver);
        *inner.inbound.borrow_mut() = Some(rx);
        *inner.notifier.borrow_mut() = Some(notifier);
        inner.state.set(ChannelState::Running);

        info!(target: LOG_TARGET, "{}: started", inner.interface);
        Ok(())
    }

    /// [`start`](Channel::start) and spawn [`drain`](Channel::drain) on the
    /// current [`tokio::task::LocalSet`].
    ///
    /// # Panics
    ///
    /// Panics when called outside a [`tokio::task::LocalSet`].
    pub fn start_local(&self) -> Result<()> {
        self.start()?;
        tokio::task::spawn_local(self.drain());
        Ok(())
    }

    /// Dispatches every frame as it is queued. Resolves once the channel
    /// stops, fails or is dropped, and immediately if it was never started.
    pub fn drain(&self) -> impl Future<Output = ()> + 'static {
        let notifier = self.inner.notifier.borrow().clone();
        drain_task(Rc::downgrade(&self.inner), notifier)
    }

    /// Stop receiving. A no-op unless the channel is running.
    ///
    /// Called from inside a listener, the stop completes once every listener
    /// has seen the current frame; frames still queued are discarded.
    pub fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.state.get() != ChannelState::Running {
            return Ok(());
        }
        if inner.dispatching.get() {
            inner.state.set(ChannelState::StopRequested);
            inner.stop_flag.store(true, Ordering::Release);
            inner.stop_deferred.set(true);
            debug!(target: LOG_TARGET, "{}: stop deferred until dispatch completes", inner.interface);
            return Ok(());
        }
        inner.shutdown(ChannelState::Stopped);
        Ok(())
    }

    /// Transmit one frame. Back-pressure surfaces as [`Error::WouldBlock`].
    pub fn send(&self, frame: &Frame) -> Result<()> {
        if self.inner.state.get() != ChannelState::Running {
            return Err(Error::NotRunning);
        }
        #[cfg(feature = "frame-dump")]
        log::trace!(target: LOG_TARGET, "{}: tx {}", self.inner.interface, frame);
        self.inner.endpoint.send(frame)
    }

    /// Replace the receive filters. An empty list receives nothing.
    pub fn set_rx_filters(&self, filters: &[CanFilter]) -> Result<()> {
        self.inner.endpoint.set_filters(filters)?;
        debug!(target: LOG_TARGET, "{}: {} rx filter(s) set", self.inner.interface, filters.len());
        Ok(())
    }

    /// Deliver everything currently queued. Returns the number of frames
    /// delivered. Re-entrant calls from a listener return 0.
    pub fn dispatch_pending(&self) -> usize {
        let inner = &self.inner;
        if inner.dispatching.get() || inner.state.get() != ChannelState::Running {
            return 0;
        }
        inner.dispatching.set(true);

        let mut delivered = 0;
        loop {
            let item = match inner.inbound.borrow().as_ref() {
                Some(rx) => rx.try_recv().ok(),
                None => None,
            };
            let Some(item) = item else { break };

            match item {
                Inbound::Frame(frame) => {
                    inner.notify_listeners(&Event::Frame(frame));
                    delivered += 1;
                }
                Inbound::Failed(err) => {
                    warn!(target: LOG_TARGET, "{}: end of stream: {}", inner.interface, err);
                    let eos = EndOfStream::from_error(&inner.interface, &err);
                    inner.notify_listeners(&Event::EndOfStream(eos));
                    inner.stop_deferred.set(false);
                    inner.shutdown(ChannelState::Failed);
                    break;
                }
            }

            if inner.stop_deferred.get() {
                break;
            }
        }

        inner.dispatching.set(false);
        if inner.stop_deferred.replace(false) {
            inner.shutdown(ChannelState::Stopped);
        }
        delivered
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("interface", &self.inner.interface)
            .field("state", &self.inner.state.get())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl WeakChannel {
    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(|inner| Channel { inner })
    }
}

impl Inner {
    fn notify_listeners(&self, event: &Event) {
        let snapshot: Vec<(ListenerId, Callback)> = self
            .listeners
            .borrow()
            .iter()
            .map(|l| (l.id, l.callback.clone()))
            .collect();

        for (id, callback) in snapshot {
            if !self.listeners.borrow().iter().any(|l| l.id == id) {
                continue;
            }
            let Ok(mut callback) = callback.try_borrow_mut() else {
                warn!(target: LOG_TARGET, "{}: listener {} re-entered, skipped", self.interface, id);
                continue;
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (&mut *callback)(event)));
            if let Err(payload) = outcome {
                error!(
                    target: LOG_TARGET,
                    "{}: listener {} panicked: {}",
                    self.interface,
                    id,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Close the endpoint, join the receiver, tear down the notifier.
    fn shutdown(&self, final_state: ChannelState) {
        self.state.set(ChannelState::StopRequested);
        self.stop_flag.store(true, Ordering::Release);
        self.endpoint.close();

        let receiver = self.receiver.borrow_mut().take();
        if let Some(mut receiver) = receiver {
            receiver.join();
        }
        let notifier = self.notifier.borrow_mut().take();
        if let Some(notifier) = notifier {
            notifier.teardown();
        }
        // Undelivered frames are dropped with the queue.
        self.inbound.borrow_mut().take();

        self.state.set(final_state);
        match final_state {
            ChannelState::Failed => warn!(target: LOG_TARGET, "{}: failed", self.interface),
            _ => info!(target: LOG_TARGET, "{}: stopped", self.interface),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if matches!(self.state.get(), ChannelState::Running | ChannelState::StopRequested) {
            self.shutdown(ChannelState::Stopped);
        }
    }
}

async fn drain_task(channel: Weak<Inner>, notifier: Option<Arc<Notifier>>) {
    let Some(notifier) = notifier else { return };
    loop {
        if notifier.is_torn_down() {
            break;
        }
        notifier.wait().await;
        if notifier.is_torn_down() {
            break;
        }
        let Some(inner) = channel.upgrade() else { break };
        Channel { inner }.dispatch_pending();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
