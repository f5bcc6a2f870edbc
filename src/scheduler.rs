//! Scheduler driver: one thread per relay firing its schedule triggers.
//!
//! The driver keeps a min-heap of `(instant, name)` pairs built from the
//! relay's armed triggers plus the next local midnight, and blocks on its
//! control channel until the soonest of them:
//!
//! ```text
//! loop {
//!     fire every due trigger up to the day boundary
//!     if the day boundary passed: recompute the table, re-arm, continue
//!     wait for min(head, boundary) or a control message
//! }
//! ```
//!
//! Heap items are never removed in place. A popped item only fires if the
//! table still holds that entry armed for that instant, so re-armed or
//! removed entries fall out naturally. `Rearm` rebuilds the heap after the
//! table changed; `Stop` (or a dropped handle) disarms everything and exits.
//!
//! Waits are capped at [`MAX_SCHEDULER_WAIT`] so wall-clock jumps are
//! noticed. With a simulated time source the clock is re-read every
//! [`SIMULATED_POLL_INTERVAL`] instead.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::constants::{MAX_SCHEDULER_WAIT, SIMULATED_POLL_INTERVAL};
use crate::relay::Relay;

pub(crate) enum SchedulerMessage {
    /// The schedule table changed; rebuild the heap.
    Rearm,
    Stop,
}

/// Control handle for a running driver.
pub(crate) struct SchedulerHandle {
    tx: Sender<SchedulerMessage>,
    thread: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn rearm(&self) {
        let _ = self.tx.send(SchedulerMessage::Rearm);
    }

    /// Stop the driver and wait for it to exit.
    pub fn stop(self) {
        let _ = self.tx.send(SchedulerMessage::Stop);
        let _ = self.thread.join();
    }
}

pub(crate) fn spawn(relay: Relay) -> io::Result<SchedulerHandle> {
    let (tx, rx) = mpsc::channel();
    let thread = std::thread::Builder::new()
        .name(format!("relay-{}-scheduler", relay.gpio()))
        .spawn(move || Driver::new(relay, rx).run())?;
    Ok(SchedulerHandle { tx, thread })
}

type Trigger = Reverse<(DateTime<Utc>, String)>;

struct Driver {
    relay: Relay,
    rx: Receiver<SchedulerMessage>,
    heap: BinaryHeap<Trigger>,
    boundary: DateTime<Utc>,
}

enum Wake {
    Elapsed,
    Rearm,
    Stop,
}

impl Driver {
    fn new(relay: Relay, rx: Receiver<SchedulerMessage>) -> Self {
        let boundary = relay.next_day_boundary();
        let mut driver = Self {
            relay,
            rx,
            heap: BinaryHeap::new(),
            boundary,
        };
        driver.rebuild_heap();
        driver
    }

    fn run(mut self) {
        log_debug!(
            self.relay.logger(),
            "scheduler for relay {} started, {} trigger(s) armed",
            self.relay.name(),
            self.heap.len()
        );

        loop {
            let now = self.relay.clock().now();
            self.fire_due(now);

            if now >= self.boundary {
                self.relay.recompute_day();
                self.boundary = self.relay.next_day_boundary();
                self.rebuild_heap();
                continue;
            }

            match self.wait(now) {
                Wake::Elapsed => {}
                Wake::Rearm => self.rebuild_heap(),
                Wake::Stop => break,
            }
        }

        self.relay.disarm_schedules();
        log_debug!(
            self.relay.logger(),
            "scheduler for relay {} stopped",
            self.relay.name()
        );
    }

    /// Fire triggers due at `now` that belong to the current day. A trigger
    /// exactly at the boundary still counts as today's.
    fn fire_due(&mut self, now: DateTime<Utc>) {
        while let Some(Reverse((at, _))) = self.heap.peek() {
            if *at > now || *at > self.boundary {
                break;
            }
            let Some(Reverse((at, name))) = self.heap.pop() else {
                break;
            };
            self.relay.fire_scheduled(&name, at);
        }
    }

    fn rebuild_heap(&mut self) {
        self.heap = self
            .relay
            .pending_triggers()
            .into_iter()
            .map(Reverse)
            .collect();
    }

    fn next_deadline(&self) -> DateTime<Utc> {
        match self.heap.peek() {
            Some(Reverse((at, _))) if *at <= self.boundary => *at,
            _ => self.boundary,
        }
    }

    fn wait(&self, now: DateTime<Utc>) -> Wake {
        let until_deadline = (self.next_deadline() - now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let cap = if self.relay.clock().is_simulated() {
            SIMULATED_POLL_INTERVAL
        } else {
            MAX_SCHEDULER_WAIT
        };

        match self.rx.recv_timeout(until_deadline.min(cap)) {
            Ok(SchedulerMessage::Rearm) => Wake::Rearm,
            Ok(SchedulerMessage::Stop) | Err(RecvTimeoutError::Disconnected) => Wake::Stop,
            Err(RecvTimeoutError::Timeout) => Wake::Elapsed,
        }
    }
}
