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

use std::sync::{
    atomic::{AtomicU64, Ordering::SeqCst},
    Arc, Mutex,
};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::support::error::Error;

/// Transport of encoded envelopes between store handles.
///
/// A channel delivers every envelope it sends to every peer except itself.
pub trait NotificationChannel: Send {
    /// Sends `data` to all peers.
    fn send(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Blocks until everything previously passed to `send` has been
    /// delivered to the peers.
    fn barrier(&mut self) -> Result<(), Error>;

    /// Returns the next envelope received from a peer, if any, without
    /// blocking.
    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, Error>;

    /// Blocks for up to `timeout` until `try_recv` has something to return.
    ///
    /// Returns whether anything is available.
    fn wait(&mut self, timeout: Duration) -> Result<bool, Error>;
}

/// A channel without peers.
#[derive(Debug, Default)]
pub struct NullChannel;

impl NotificationChannel for NullChannel {
    fn send(&mut self, _: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn barrier(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, Error> {
        Ok(None)
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool, Error> {
        std::thread::sleep(timeout);
        Ok(false)
    }
}

/// Connects store handles within one process.
///
/// Clones of a `MemoryHub` share the same set of peers.
#[derive(Clone, Default)]
pub struct MemoryHub {
    peers: Arc<Mutex<Vec<(u64, Sender<Vec<u8>>)>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new channel attached to this hub.
    pub fn connect(&self) -> MemoryChannel {
        let id = self.next_id.fetch_add(1, SeqCst);
        let (sender, receiver) = channel::unbounded();
        if let Ok(mut peers) = self.peers.lock() {
            peers.push((id, sender));
        }

        MemoryChannel {
            hub: self.clone(),
            id,
            receiver,
            stash: None,
        }
    }
}

pub struct MemoryChannel {
    hub: MemoryHub,
    id: u64,
    receiver: Receiver<Vec<u8>>,
    stash: Option<Vec<u8>>,
}

impl NotificationChannel for MemoryChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let peers = self.hub.peers.lock().map_err(|_| poisoned())?;
        for &(id, ref sender) in peers.iter() {
            if id != self.id {
                // A disconnected peer is one being dropped.
                let _ = sender.send(data.to_vec());
            }
        }
        Ok(())
    }

    // Sending enqueues directly on the peers' receivers.
    fn barrier(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, Error> {
        if let Some(data) = self.stash.take() {
            return Ok(Some(data));
        }

        Ok(self.receiver.try_recv().ok())
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool, Error> {
        if self.stash.is_some() {
            return Ok(true);
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(data) => {
                self.stash = Some(data);
                Ok(true)
            },
            Err(RecvTimeoutError::Timeout)
            | Err(RecvTimeoutError::Disconnected) => Ok(false),
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if let Ok(mut peers) = self.hub.peers.lock() {
            peers.retain(|&(id, _)| id != self.id);
        }
    }
}

fn poisoned() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "notification hub poisoned",
    ))
}
