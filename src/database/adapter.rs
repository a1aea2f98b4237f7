use super::DatabaseError;
use super::description::NetworkDescription;
use super::service::{DatabaseService, Message, Signal, SubscriptionId};
use crate::runtime::Channel;

use log::info;
use std::path::Path;

const LOG_TARGET: &str = "canbridge::database";

/// What a listener registered by path is told about.
#[derive(Debug, Clone, Copy)]
pub enum Update<'a> {
    Message(&'a Message),
    Signal(&'a Signal),
}

/// A started channel with a database service for one bus, addressed by
/// `"Message"` and `"Message.Signal"` paths.
pub struct CanAdapter {
    channel: Channel,
    db: DatabaseService,
}

impl CanAdapter {
    /// Parse the description at `description_path`, open `interface` and
    /// start decoding the messages of `bus`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a [`tokio::task::LocalSet`].
    pub fn setup(description_path: impl AsRef<Path>, interface: &str, bus: &str) -> Result<Self, DatabaseError> {
        info!(target: LOG_TARGET, "Setting up CAN adapter...");
        let network = NetworkDescription::from_file(description_path)?;
        let channel = Channel::open(interface, false)?;
        let adapter = CanAdapter::with_channel(channel, &network, bus)?;
        info!(target: LOG_TARGET, "Setting up CAN adapter... DONE");
        Ok(adapter)
    }

    /// Like [`setup`](CanAdapter::setup) over a channel that has not been started.
    pub fn with_channel(channel: Channel, network: &NetworkDescription, bus: &str) -> Result<Self, DatabaseError> {
        let bus = network.bus(bus)?;
        let db = DatabaseService::attach(&channel, &bus.messages);
        channel.start_local()?;
        Ok(CanAdapter { channel, db })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn database(&self) -> &DatabaseService {
        &self.db
    }

    pub fn stop(&self) -> Result<(), DatabaseError> {
        info!(target: LOG_TARGET, "Stopping CAN adapter...");
        self.channel.stop()?;
        info!(target: LOG_TARGET, "Stopping CAN adapter... DONE");
        Ok(())
    }

    /// Listen on a message (`"Lights"`) or one of its signals (`"Lights.Head"`).
    pub fn register_listener<F>(&self, path: &str, mut callback: F) -> Result<SubscriptionId, DatabaseError>
    where
        F: FnMut(Update<'_>) + 'static,
    {
        match split_path(path)? {
            (message, None) => self
                .db
                .on_message(message, move |m| callback(Update::Message(m))),
            (message, Some(signal)) => self
                .db
                .on_signal(message, signal, move |s| callback(Update::Signal(s))),
        }
    }

    pub fn unregister_listener(&self, id: SubscriptionId) -> bool {
        self.db.remove_listener(id)
    }

    /// Takes effect on the bus with the next [`send_message`](CanAdapter::send_message).
    pub fn update_signal_value(&self, message: &str, signal: &str, value: f64) -> Result<(), DatabaseError> {
        self.db.update_signal(message, signal, value)
    }

    pub fn send_message(&self, message: &str) -> Result<(), DatabaseError> {
        self.db.send(message)
    }
}

fn split_path(path: &str) -> Result<(&str, Option<&str>), DatabaseError> {
    let mut parts = path.split('.');
    let message = parts.next().unwrap_or_default();
    match (parts.next(), parts.next()) {
        (None, _) => Ok((message, None)),
        (Some(signal), None) => Ok((message, Some(signal))),
        (Some(_), Some(_)) => Err(DatabaseError::UnknownSignal {
            message: message.to_string(),
            signal: path[message.len() + 1..].to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("Lights").unwrap(), ("Lights", None));
        assert_eq!(split_path("Lights.Head").unwrap(), ("Lights", Some("Head")));
        match split_path("Lights.Head.Left") {
            Err(DatabaseError::UnknownSignal { message, signal }) => {
                assert_eq!(message, "Lights");
                assert_eq!(signal, "Head.Left");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
