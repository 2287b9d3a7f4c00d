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

//! The SQLite storage layer.
//!
//! The storage layer owns the schema and the transaction discipline. The
//! general guidelines are:
//!
//! 1. Every access happens in a transaction obtained through `retry`.
//! 2. Write transactions are `IMMEDIATE`, so that lock contention surfaces
//!    when the transaction is opened rather than midway through it.

use std::path::Path;
use std::time::Duration;

use crate::support::{
    config::StoreConfig, error::Error, log_prefix::LogPrefix,
};

mod migrations;
pub mod retry;
pub mod types;

/// Opens the database at `path`, creating it and bringing its schema up to
/// date as needed.
pub fn open(
    path: &Path,
    config: &StoreConfig,
    log_prefix: &LogPrefix,
    retries: &mut u64,
) -> Result<rusqlite::Connection, Error> {
    let mut cxn = rusqlite::Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    cxn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

    let policy = retry::RetryPolicy::from(&config.retry);
    retry::repeatedly(&policy, log_prefix, "open", retries, || {
        cxn.pragma_update(None, "journal_mode", "WAL")
            .map_err(Into::into)
    })?;
    retry::repeatedly(&policy, log_prefix, "migrate", retries, || {
        migrations::apply_migrations(
            log_prefix,
            &mut cxn,
            migrations::MIGRATIONS,
        )
    })?;

    Ok(cxn)
}

/// Whether a transaction may modify the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Begins a transaction on `cxn` for `access`.
///
/// Writers take the write lock up front. In debug builds readers run with
/// `query_only` set, so a write issued from a read path fails.
pub fn begin(
    cxn: &mut rusqlite::Connection,
    access: Access,
) -> rusqlite::Result<rusqlite::Transaction<'_>> {
    #[cfg(debug_assertions)]
    cxn.pragma_update(None, "query_only", Access::Read == access)?;

    cxn.transaction_with_behavior(match access {
        Access::Read => rusqlite::TransactionBehavior::Deferred,
        Access::Write => rusqlite::TransactionBehavior::Immediate,
    })
}
