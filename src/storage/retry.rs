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

//! The transaction wrapper through which every database access passes.
//!
//! An operation is a closure over a transaction. It is retried with
//! exponential backoff for as long as SQLite reports the database busy, up to
//! the attempt limit of the policy. Every attempt runs in a fresh
//! transaction, so a failed attempt leaves nothing behind.

use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use super::{begin, Access};
use crate::support::{
    config::RetryConfig,
    error::{Error, FailureKind},
    log_prefix::LogPrefix,
};

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            min_delay: config.min_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Runs `f` until it succeeds, fails with a non-transient error, or has been
/// retried `policy.max_attempts` times.
///
/// `retries` is incremented once for every retry made.
pub fn repeatedly<T>(
    policy: &RetryPolicy,
    log_prefix: &LogPrefix,
    what: &'static str,
    retries: &mut u64,
    mut f: impl FnMut() -> Result<T, Error>,
) -> Result<T, Error> {
    let mut delay = policy.min_delay;
    let mut attempt = 0u32;

    loop {
        match f() {
            Ok(v) => {
                if attempt > 0 {
                    info!(
                        "{log_prefix} {what} succeeded after {attempt} \
                         retries"
                    );
                }
                return Ok(v);
            },

            Err(e) if FailureKind::Transient == e.kind() => {
                if attempt >= policy.max_attempts {
                    error!(
                        "{log_prefix} {what} still contended after \
                         {attempt} retries, giving up: {e}"
                    );
                    return Err(Error::RetriesExhausted {
                        what,
                        attempts: attempt + 1,
                    });
                }

                warn!(
                    "{log_prefix} {what} found the store busy ({e}), \
                     retrying in {delay:?}"
                );
                thread::sleep(delay);
                delay = (delay * 2).min(policy.max_delay);
                attempt += 1;
                *retries += 1;
            },

            Err(e) => {
                if FailureKind::Fatal == e.kind() {
                    error!("{log_prefix} {what} failed: {e}");
                }
                return Err(e);
            },
        }
    }
}

/// Runs `f` within an immediate write transaction, committing on success.
pub fn write<T>(
    cxn: &mut rusqlite::Connection,
    policy: &RetryPolicy,
    log_prefix: &LogPrefix,
    what: &'static str,
    retries: &mut u64,
    mut f: impl FnMut(&rusqlite::Transaction<'_>) -> Result<T, Error>,
) -> Result<T, Error> {
    repeatedly(policy, log_prefix, what, retries, || {
        let txn = begin(cxn, Access::Write)?;
        let v = f(&txn)?;
        txn.commit().map_err(Error::Commit)?;
        Ok(v)
    })
}

/// Runs `f` within a deferred read transaction.
pub fn read<T>(
    cxn: &mut rusqlite::Connection,
    policy: &RetryPolicy,
    log_prefix: &LogPrefix,
    what: &'static str,
    retries: &mut u64,
    mut f: impl FnMut(&rusqlite::Transaction<'_>) -> Result<T, Error>,
) -> Result<T, Error> {
    repeatedly(policy, log_prefix, what, retries, || {
        let txn = begin(cxn, Access::Read)?;
        f(&txn)
    })
}
