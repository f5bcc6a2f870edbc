//! Command intake: a persistent per-relay consumer of change requests.
//!
//! Producers (the HTTP layer, tests) hold a [`CommandSender`] obtained from
//! [`Relay::commands`](super::Relay::commands). Requests are applied in the
//! order they were sent, for as long as the relay lives. The consumer exits
//! when the relay shuts down or when every sender is gone.

use std::io;
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::thread::JoinHandle;

use super::{Relay, RelayChange};

pub(crate) enum IntakeMessage {
    Change(RelayChange),
    Stop,
}

/// Submits change requests to a relay's command intake.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<IntakeMessage>,
}

impl CommandSender {
    /// Queue `change`. Fails, handing the change back, once the intake has
    /// stopped.
    pub fn send(&self, change: RelayChange) -> Result<(), SendError<RelayChange>> {
        self.tx
            .send(IntakeMessage::Change(change))
            .map_err(|_| SendError(change))
    }

    pub(crate) fn stop(&self) {
        let _ = self.tx.send(IntakeMessage::Stop);
    }
}

pub(crate) fn channel() -> (CommandSender, Receiver<IntakeMessage>) {
    let (tx, rx) = mpsc::channel();
    (CommandSender { tx }, rx)
}

pub(crate) fn spawn(relay: Relay, rx: Receiver<IntakeMessage>) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("relay-{}-intake", relay.gpio()))
        .spawn(move || run(relay, rx))
}

fn run(relay: Relay, rx: Receiver<IntakeMessage>) {
    for message in rx {
        match message {
            IntakeMessage::Change(change) => {
                relay.apply(change);
            }
            IntakeMessage::Stop => break,
        }
    }
    log_debug!(
        relay.logger(),
        "command intake for relay {} stopped",
        relay.name()
    );
}
