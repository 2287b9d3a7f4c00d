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

use std::fmt;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included in at the start of every log statement.
///
/// Clones of a `LogPrefix` share the same underlying data.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    name: String,
    pid: u32,
    handle: Option<u64>,
    delivering: bool,
}

impl LogPrefix {
    pub fn new(name: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                name: sanitise(name),
                pid: std::process::id(),
                handle: None,
                delivering: false,
            })),
        }
    }

    /// Sets the per-process serial number of the store handle, so that
    /// several handles in one process can be told apart.
    pub fn set_handle(&self, serno: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.handle = Some(serno);
        }
    }

    /// Marks whether the handle is currently applying notifications from
    /// another process.
    pub fn set_delivering(&self, delivering: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.delivering = delivering;
        }
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Ok(inner) = self.inner.lock() else {
            return write!(f, "?");
        };

        write!(f, "{}[pid={}", inner.name, inner.pid)?;
        if let Some(handle) = inner.handle {
            write!(f, ".{handle}")?;
        }
        if inner.delivering {
            write!(f, " foreign")?;
        }
        write!(f, "]")
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}
