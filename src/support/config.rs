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

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// The configuration for one store.
///
/// This is typically loaded from a `mailstore.toml` file, but every field has
/// a usable default, so an empty document is a valid configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The directory holding the database, the content blobs and the
    /// notification sockets.
    pub path: PathBuf,

    /// Name used at the start of log lines.
    pub name: String,

    /// How long SQLite itself waits for a lock before reporting the database
    /// busy, in milliseconds.
    ///
    /// The default of 0 hands all contention to the retry policy.
    pub busy_timeout_ms: u64,

    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub key: KeyConfig,
    pub notify: NotifyConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            name: "mailstore".to_owned(),
            busy_timeout_ms: 0,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            key: KeyConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Returns the default configuration rooted at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(Into::into)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn db_path(&self) -> PathBuf {
        self.path.join("mailstore.sqlite")
    }

    pub fn content_path(&self) -> PathBuf {
        self.path.join("content")
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.path.join("tmp")
    }

    pub fn notify_path(&self) -> PathBuf {
        self.path.join("notify")
    }
}

/// Backoff policy for transactions which find the database busy.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub min_delay_ms: u64,
    /// The delay doubles on every retry but never exceeds this.
    pub max_delay_ms: u64,
    /// The number of retries made before giving up.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 64,
            max_delay_ms: 2048,
            max_attempts: 10,
        }
    }
}

impl RetryConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub account_capacity: u64,
    pub folder_capacity: u64,
    pub header_capacity: u64,
    /// Half the size of the window preloaded around a header cache miss.
    pub look_ahead: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            account_capacity: 10,
            folder_capacity: 100,
            header_capacity: 1000,
            look_ahead: 5,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct KeyConfig {
    /// The maximum number of leaf comparisons a single key may carry,
    /// counting those inside nested keys.
    pub max_comparators: usize,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            max_comparators: 256,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Events closer together than this are coalesced before being sent to
    /// other processes.
    pub coalesce_window_ms: u64,
    /// The maximum number of ids carried by one envelope.
    pub max_segment_size: usize,
    /// How long a flush waits for slow peers to accept queued envelopes
    /// before reporting them undelivered.
    pub barrier_timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 1000,
            max_segment_size: 256,
            barrier_timeout_ms: 5000,
        }
    }
}

impl NotifyConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }
}
