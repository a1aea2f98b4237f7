use super::notifier::Notifier;
use crate::codec::Frame;
use crate::error::Error;
use crate::transport::CanEndpoint;

use log::{debug, error};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

const LOG_TARGET: &str = "canbridge::receiver";

/// Item on the inbound queue.
#[derive(Debug)]
pub enum Inbound {
    Frame(Frame),
    /// Terminal marker: the receiver thread has exited because of this error.
    Failed(Error),
}

/// Handle to the background thread that owns the blocking receive.
pub struct Receiver {
    thread: Option<thread::JoinHandle<()>>,
}

impl Receiver {
    pub fn spawn(
        endpoint: Arc<dyn CanEndpoint>,
        queue: mpsc::Sender<Inbound>,
        notifier: Arc<Notifier>,
        stop: Arc<AtomicBool>,
    ) -> io::Result<Receiver> {
        let thread = thread::Builder::new()
            .name(format!("can-rx-{}", endpoint.interface()))
            .spawn(move || receive_loop(endpoint.as_ref(), &queue, &notifier, &stop))?;

        Ok(Receiver {
            thread: Some(thread),
        })
    }

    /// Wait for the thread to exit. Its blocking receive must already have
    /// been interrupted by closing the endpoint.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(target: LOG_TARGET, "receiver thread panicked");
            }
        }
    }

    pub fn is_joined(&self) -> bool {
        self.thread.is_none()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.join();
    }
}

fn receive_loop(
    endpoint: &dyn CanEndpoint,
    queue: &mpsc::Sender<Inbound>,
    notifier: &Notifier,
    stop: &AtomicBool,
) {
    let interface = endpoint.interface().to_string();
    debug!(target: LOG_TARGET, "{}: receiver started", interface);

    let mut received: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        match endpoint.receive_blocking() {
            Ok(frame) => {
                #[cfg(feature = "frame-dump")]
                log::trace!(target: LOG_TARGET, "{}: {} {:02X?}", interface, frame, frame.to_bytes());

                if queue.send(Inbound::Frame(frame)).is_err() {
                    // Consumer gone
                    break;
                }
                received += 1;
                notifier.signal();
            }
            Err(err) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                error!(target: LOG_TARGET, "{}: receive failed: {}", interface, err);
                let _ = queue.send(Inbound::Failed(err));
                notifier.signal();
                break;
            }
        }
    }

    debug!(target: LOG_TARGET, "{}: receiver exiting after {} frame(s)", interface, received);
}
