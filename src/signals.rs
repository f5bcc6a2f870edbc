//! Signal handling for the daemon.
//!
//! SIGINT, SIGTERM and SIGHUP are turned into a [`SignalMessage::Shutdown`] on
//! a channel so the main thread can stop every relay's threads and flush the
//! log before exiting.

use anyhow::{Context, Result};
use signal_hook::{
    consts::signal::{SIGHUP, SIGINT, SIGTERM},
    iterator::Signals,
};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use crate::logger::Logger;

/// Message delivered by the signal thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// Termination requested (SIGTERM, SIGINT, SIGHUP)
    Shutdown { signal: i32 },
}

/// Receiving side of the signal channel.
pub struct SignalState {
    pub signal_receiver: Receiver<SignalMessage>,
    /// Extra sender for in-process shutdown requests
    pub signal_sender: Sender<SignalMessage>,
}

impl SignalState {
    /// Block until a shutdown is requested. Returns the signal number, or
    /// `None` if every sender went away.
    pub fn wait_for_shutdown(&self) -> Option<i32> {
        match self.signal_receiver.recv() {
            Ok(SignalMessage::Shutdown { signal }) => Some(signal),
            Err(_) => None,
        }
    }
}

/// Register the handlers and start the signal thread.
pub fn setup_signal_handler(log: Logger) -> Result<SignalState> {
    let (signal_sender, signal_receiver) = mpsc::channel::<SignalMessage>();

    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).context("failed to register signal handlers")?;

    let sender = signal_sender.clone();
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                log_debug!(log, "received signal {signal}");
                if sender.send(SignalMessage::Shutdown { signal }).is_err() {
                    break;
                }
            }
        })
        .context("failed to start signal thread")?;

    Ok(SignalState {
        signal_receiver,
        signal_sender,
    })
}
