use super::DatabaseError;
use super::description::{MessageDef, SignalDef, message_key};
use crate::codec::{Frame, decode_signal, encode_signal};
use crate::runtime::{Channel, Event, ListenerId};

use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

const LOG_TARGET: &str = "canbridge::database";

/// Current value of one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    def: SignalDef,
    value: f64,
}

impl Signal {
    fn new(def: SignalDef) -> Self {
        let value = def.default_value;
        Signal { def, value }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &SignalDef {
        &self.def
    }

    /// Physical value: raw value with factor and offset applied.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The value mapped onto `[min_value, max_value]` in steps of `resolution`.
    ///
    /// Returns [`value`](Signal::value) unchanged unless all three are set.
    pub fn scaled_value(&self) -> f64 {
        let (Some(min), Some(max), Some(resolution)) =
            (self.def.min_value, self.def.max_value, self.def.resolution)
        else {
            return self.value;
        };
        if resolution == 0.0 {
            return self.value;
        }
        let source_range = 2f64.powi(self.def.bit_length as i32) - 1.0;
        let exact = self.value / source_range * (max - min);
        (exact / resolution).floor() * resolution + min
    }
}

/// Current state of one message and its signals.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    name: String,
    id: u32,
    extended: bool,
    length: u8,
    signals: Vec<Signal>,
}

impl Message {
    fn new(def: &MessageDef) -> Self {
        Message {
            name: def.name.clone(),
            id: def.id,
            extended: def.extended,
            length: def.length,
            signals: def.signals.iter().cloned().map(Signal::new).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name() == name)
    }

    /// Frame carrying the current signal values.
    pub fn encode(&self) -> Result<Frame, DatabaseError> {
        let mut data = vec![0u8; self.length as usize];
        for signal in &self.signals {
            let def = &signal.def;
            encode_signal(
                &mut data,
                def.bit_offset,
                def.bit_length,
                def.is_little_endian(),
                def.to_raw(signal.value),
            )
            .map_err(|source| DatabaseError::Signal {
                signal: def.name.clone(),
                source,
            })?;
        }
        Ok(Frame::from_parts(self.id, self.extended, false, false, &data)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type MessageCallback = Rc<RefCell<dyn FnMut(&Message)>>;
type SignalCallback = Rc<RefCell<dyn FnMut(&Signal)>>;

struct State {
    messages: Vec<Message>,
    by_key: HashMap<u32, usize>,
    by_name: HashMap<String, usize>,
    message_listeners: Vec<(SubscriptionId, usize, MessageCallback)>,
    signal_listeners: Vec<(SubscriptionId, (usize, usize), SignalCallback)>,
}

impl State {
    fn message_index(&self, name: &str) -> Result<usize, DatabaseError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| DatabaseError::UnknownMessage(name.to_string()))
    }

    fn signal_index(&self, message: &str, signal: &str) -> Result<(usize, usize), DatabaseError> {
        let m = self.message_index(message)?;
        let s = self.messages[m]
            .signals
            .iter()
            .position(|s| s.name() == signal)
            .ok_or_else(|| DatabaseError::UnknownSignal {
                message: message.to_string(),
                signal: signal.to_string(),
            })?;
        Ok((m, s))
    }
}

struct Inner {
    channel: Channel,
    channel_listener: Cell<Option<ListenerId>>,
    state: RefCell<State>,
    next_subscription: Cell<u64>,
}

/// Message and signal values of one bus, kept current from a channel.
///
/// Listeners run on the channel's owning thread. They receive a snapshot, so
/// they may call back into the service.
#[derive(Clone)]
pub struct DatabaseService {
    inner: Rc<Inner>,
}

impl DatabaseService {
    /// Bind `messages` to `channel`. Later messages with a duplicate name or
    /// id shadow earlier ones.
    pub fn attach(channel: &Channel, messages: &[MessageDef]) -> DatabaseService {
        let mut state = State {
            messages: Vec::with_capacity(messages.len()),
            by_key: HashMap::new(),
            by_name: HashMap::new(),
            message_listeners: Vec::new(),
            signal_listeners: Vec::new(),
        };
        for (index, def) in messages.iter().enumerate() {
            state.messages.push(Message::new(def));
            state.by_key.insert(def.key(), index);
            state.by_name.insert(def.name.clone(), index);
        }

        let inner = Rc::new(Inner {
            channel: channel.clone(),
            channel_listener: Cell::new(None),
            state: RefCell::new(state),
            next_subscription: Cell::new(1),
        });

        let weak: Weak<Inner> = Rc::downgrade(&inner);
        let id = channel.add_listener(move |event| {
            if let Some(inner) = weak.upgrade() {
                DatabaseService { inner }.on_event(event);
            }
        });
        inner.channel_listener.set(Some(id));

        debug!(target: LOG_TARGET, "{}: attached {} message(s)", channel.interface(), messages.len());
        DatabaseService { inner }
    }

    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    pub fn message(&self, name: &str) -> Option<Message> {
        let state = self.inner.state.borrow();
        let index = state.by_name.get(name)?;
        Some(state.messages[*index].clone())
    }

    pub fn signal(&self, message: &str, signal: &str) -> Result<Signal, DatabaseError> {
        let state = self.inner.state.borrow();
        let (m, s) = state.signal_index(message, signal)?;
        Ok(state.messages[m].signals[s].clone())
    }

    /// Called with the message each time a frame for it has been decoded.
    pub fn on_message<F>(&self, message: &str, callback: F) -> Result<SubscriptionId, DatabaseError>
    where
        F: FnMut(&Message) + 'static,
    {
        let id = self.next_id();
        let mut state = self.inner.state.borrow_mut();
        let index = state.message_index(message)?;
        state
            .message_listeners
            .push((id, index, Rc::new(RefCell::new(callback))));
        Ok(id)
    }

    /// Called with the signal each time it is decoded or updated, changed or not.
    pub fn on_signal<F>(&self, message: &str, signal: &str, callback: F) -> Result<SubscriptionId, DatabaseError>
    where
        F: FnMut(&Signal) + 'static,
    {
        let id = self.next_id();
        let mut state = self.inner.state.borrow_mut();
        let index = state.signal_index(message, signal)?;
        state
            .signal_listeners
            .push((id, index, Rc::new(RefCell::new(callback))));
        Ok(id)
    }

    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        let mut state = self.inner.state.borrow_mut();
        let before = state.message_listeners.len() + state.signal_listeners.len();
        state.message_listeners.retain(|(sid, _, _)| *sid != id);
        state.signal_listeners.retain(|(sid, _, _)| *sid != id);
        before != state.message_listeners.len() + state.signal_listeners.len()
    }

    /// Set a signal's physical value. It goes on the bus with the next
    /// [`send`](DatabaseService::send) of its message.
    pub fn update_signal(&self, message: &str, signal: &str, value: f64) -> Result<(), DatabaseError> {
        let index = self.inner.state.borrow().signal_index(message, signal)?;
        self.set_signal(index, value);
        Ok(())
    }

    /// Encode the current values of `message` and send the frame.
    pub fn send(&self, message: &str) -> Result<(), DatabaseError> {
        let frame = {
            let state = self.inner.state.borrow();
            let index = state.message_index(message)?;
            state.messages[index].encode()?
        };
        self.inner.channel.send(&frame)?;
        debug!(target: LOG_TARGET, "sent {} as {}", message, frame);
        Ok(())
    }

    fn next_id(&self) -> SubscriptionId {
        let id = self.inner.next_subscription.get();
        self.inner.next_subscription.set(id + 1);
        SubscriptionId(id)
    }

    fn on_event(&self, event: &Event) {
        match event {
            Event::Frame(frame) => self.on_frame(frame),
            Event::EndOfStream(eos) => {
                warn!(target: LOG_TARGET, "{}: no more frames: {}", eos.interface, eos.reason)
            }
        }
    }

    fn on_frame(&self, frame: &Frame) {
        if frame.is_rtr() || frame.is_error_frame() {
            return;
        }
        let key = message_key(frame.id(), frame.is_extended());
        let Some(index) = self.inner.state.borrow().by_key.get(&key).copied() else {
            debug!(target: LOG_TARGET, "Message ID {:#X} not found", frame.id());
            return;
        };

        let signal_count = self.inner.state.borrow().messages[index].signals.len();
        for s in 0..signal_count {
            let decoded = {
                let state = self.inner.state.borrow();
                let def = &state.messages[index].signals[s].def;
                decode_signal(frame.data(), def.bit_offset, def.bit_length, def.is_little_endian(), def.signed)
                    .map(|raw| def.to_physical(raw))
                    .map_err(|e| (def.name.clone(), e))
            };
            match decoded {
                Ok(value) => self.set_signal((index, s), value),
                Err((name, e)) => warn!(target: LOG_TARGET, "{:#X}: signal {}: {}", frame.id(), name, e),
            }
        }

        self.notify_message(index);
    }

    fn set_signal(&self, (m, s): (usize, usize), value: f64) {
        let (snapshot, callbacks) = {
            let mut state = self.inner.state.borrow_mut();
            state.messages[m].signals[s].value = value;
            let callbacks: Vec<SignalCallback> = state
                .signal_listeners
                .iter()
                .filter(|(_, index, _)| *index == (m, s))
                .map(|(_, _, cb)| cb.clone())
                .collect();
            (state.messages[m].signals[s].clone(), callbacks)
        };
        for callback in callbacks {
            if let Ok(mut callback) = callback.try_borrow_mut() {
                (&mut *callback)(&snapshot);
            }
        }
    }

    fn notify_message(&self, m: usize) {
        let (snapshot, callbacks) = {
            let state = self.inner.state.borrow();
            let callbacks: Vec<MessageCallback> = state
                .message_listeners
                .iter()
                .filter(|(_, index, _)| *index == m)
                .map(|(_, _, cb)| cb.clone())
                .collect();
            (state.messages[m].clone(), callbacks)
        };
        for callback in callbacks {
            if let Ok(mut callback) = callback.try_borrow_mut() {
                (&mut *callback)(&snapshot);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(id) = self.channel_listener.take() {
            self.channel.remove_listener(id);
        }
    }
}
