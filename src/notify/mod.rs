//-
// Copyright (c) 2023, the Mailstore developers
//
// This file is part of Mailstore.
//
// Mailstore is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailstore is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Mailstore. If not, see <http://www.gnu.org/licenses/>.

//! Change notification.
//!
//! Every committed mutation produces `ChangeEvent`s. They are handed
//! synchronously to the listeners registered on the store handle that made
//! the change, and are queued in a `NotificationBuffer` for delivery to other
//! store handles through a `NotificationChannel`.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering::SeqCst},
    Arc,
};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::support::{
    config::NotifyConfig, error::Error, log_prefix::LogPrefix,
};

mod buffer;
pub mod channel;
pub mod envelope;
pub mod unix;

pub use self::buffer::NotificationBuffer;
pub use self::channel::{
    MemoryChannel, MemoryHub, NotificationChannel, NullChannel,
};
pub use self::envelope::{Envelope, Origin, Payload};
pub use self::unix::UnixChannel;

static HANDLE_SERNO: AtomicU64 = AtomicU64::new(0);

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum ChangeType {
    Added,
    Removed,
    Updated,
    ContentsModified,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum EntityKind {
    Account,
    Folder,
    Message,
    /// Ids of removal-record events are the ids of the owning accounts.
    RemovalRecord,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub change: ChangeType,
    pub kind: EntityKind,
    pub ids: Vec<i64>,
    /// Whether the change was made through another store handle.
    pub foreign: bool,
}

pub trait Listener: Send {
    fn on_change(&mut self, event: &ChangeEvent);
}

impl<F: FnMut(&ChangeEvent) + Send> Listener for F {
    fn on_change(&mut self, event: &ChangeEvent) {
        self(event)
    }
}

/// A listener which forwards every event into a channel.
pub struct ChannelListener {
    sender: Sender<ChangeEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<ChangeEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl Listener for ChannelListener {
    fn on_change(&mut self, event: &ChangeEvent) {
        // Nobody listening on the receiver is fine.
        let _ = self.sender.send(event.clone());
    }
}

/// Reports whether a store handle is currently delivering notifications
/// that originated from another handle.
///
/// Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct DeliveryFlag(Arc<AtomicBool>);

impl DeliveryFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(SeqCst)
    }

    fn set(&self, value: bool) {
        self.0.store(value, SeqCst);
    }
}

/// The notification state of one store handle.
pub struct Notifier {
    log_prefix: LogPrefix,
    origin: Origin,
    listeners: Vec<Box<dyn Listener>>,
    buffer: NotificationBuffer,
    channel: Box<dyn NotificationChannel>,
    /// Encoded envelopes drained from the buffer but not yet accepted by the
    /// channel, oldest first.
    outbox: VecDeque<Vec<u8>>,
    max_segment_size: usize,
    delivering: DeliveryFlag,
}

impl Notifier {
    /// Allocates the origin for a new store handle in this process.
    pub fn new_origin() -> Origin {
        Origin {
            pid: nix::unistd::getpid().as_raw() as u32,
            serno: HANDLE_SERNO.fetch_add(1, SeqCst),
        }
    }

    pub fn new(
        log_prefix: LogPrefix,
        origin: Origin,
        config: &NotifyConfig,
        channel: Box<dyn NotificationChannel>,
    ) -> Self {
        Self {
            log_prefix,
            origin,
            listeners: Vec::new(),
            buffer: NotificationBuffer::new(config.coalesce_window()),
            channel,
            outbox: VecDeque::new(),
            max_segment_size: config.max_segment_size,
            delivering: DeliveryFlag::default(),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn delivery_flag(&self) -> DeliveryFlag {
        self.delivering.clone()
    }

    pub fn add_listener(&mut self, listener: Box<dyn Listener>) {
        self.listeners.push(listener);
    }

    /// Reports a committed change.
    ///
    /// Local listeners see the change before this returns. Other handles see
    /// it once the buffer is next drained.
    pub fn emit(&mut self, change: ChangeType, kind: EntityKind, ids: &[i64]) {
        if ids.is_empty() {
            return;
        }

        let event = ChangeEvent {
            change,
            kind,
            ids: ids.to_vec(),
            foreign: false,
        };
        for listener in &mut self.listeners {
            listener.on_change(&event);
        }

        if self.buffer.record(change, kind, event.ids, Instant::now()) {
            self.fill_outbox();
            self.try_send_outbox();
        }
    }

    /// Sends pending changes whose coalescing window has passed, along with
    /// anything an earlier send failed to deliver.
    pub fn poll(&mut self) {
        if self.buffer.is_due(Instant::now()) {
            self.fill_outbox();
        }
        if !self.outbox.is_empty() {
            self.try_send_outbox();
        }
    }

    /// Sends all pending changes, then blocks until every peer has them.
    ///
    /// On error, whatever was not sent stays queued for the next attempt.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.fill_outbox();
        self.send_outbox()?;

        let barrier = Envelope {
            origin: self.origin,
            payload: Payload::Barrier,
        };
        self.channel.send(&barrier.encode()?)?;
        self.channel.barrier()
    }

    fn fill_outbox(&mut self) {
        for (change, kind, ids) in self.buffer.drain() {
            for envelope in envelope::segment(
                self.origin,
                change,
                kind,
                &ids,
                self.max_segment_size,
            ) {
                match envelope.encode() {
                    Ok(data) => self.outbox.push_back(data),
                    Err(e) => error!(
                        "{} Failed to encode {:?} notification: {}",
                        self.log_prefix, envelope.payload, e,
                    ),
                }
            }
        }
    }

    /// Sends the outbox in order. An envelope leaves it only once the
    /// channel accepts it.
    fn send_outbox(&mut self) -> Result<(), Error> {
        while let Some(data) = self.outbox.front() {
            self.channel.send(data)?;
            self.outbox.pop_front();
        }
        Ok(())
    }

    fn try_send_outbox(&mut self) {
        if let Err(e) = self.send_outbox() {
            warn!(
                "{} Holding {} notifications after failed send: {}",
                self.log_prefix,
                self.outbox.len(),
                e,
            );
        }
    }

    /// Collects the changes other handles have sent since the last call.
    pub fn receive(&mut self) -> Result<Vec<ChangeEvent>, Error> {
        let mut events = Vec::new();
        while let Some(data) = self.channel.try_recv()? {
            let envelope = match Envelope::decode(&data) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("{} Discarding bad envelope: {}", self.log_prefix, e);
                    continue;
                },
            };

            if envelope.origin == self.origin {
                continue;
            }

            if let Payload::Change { change, kind, ids } = envelope.payload {
                events.push(ChangeEvent {
                    change,
                    kind,
                    ids,
                    foreign: true,
                });
            }
        }

        Ok(events)
    }

    /// Hands changes received from other handles to the local listeners.
    ///
    /// The delivery flag is set while this runs.
    pub fn deliver_foreign(&mut self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }

        self.delivering.set(true);
        self.log_prefix.set_delivering(true);
        for event in events {
            for listener in &mut self.listeners {
                listener.on_change(event);
            }
        }
        self.log_prefix.set_delivering(false);
        self.delivering.set(false);
    }

    /// Blocks for up to `timeout` until another handle sends something.
    pub fn wait(&mut self, timeout: Duration) -> Result<bool, Error> {
        self.channel.wait(timeout)
    }
}
