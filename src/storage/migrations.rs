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

//! Versioned schema migrations.
//!
//! The versions applied to a database are recorded in `schema_migrations`.
//! A store never opens a database carrying a version it does not know, since
//! its statements may not match the tables found there.

use log::info;
use rusqlite::OptionalExtension as _;

use super::types::*;
use crate::support::{error::Error, log_prefix::LogPrefix};

pub struct Migration {
    pub version: u32,
    pub summary: &'static str,
    pub sql: &'static str,
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        summary: "accounts, folder hierarchy, messages, removal records and \
                  status flags",
        sql: include_str!("schema.v1.sql"),
    },
    Migration {
        version: 2,
        summary: "per-account configuration",
        sql: include_str!("schema.v2.sql"),
    },
];

/// Brings the database up to the last version in `migrations`, which must be
/// sorted by version.
pub fn apply_migrations(
    log_prefix: &LogPrefix,
    cxn: &mut rusqlite::Connection,
    migrations: &[Migration],
) -> Result<(), Error> {
    let latest = migrations.last().map_or(0, |m| m.version);
    if check_version(cxn, latest)? == latest {
        return Ok(());
    }

    let txn = cxn
        .transaction_with_behavior(rusqlite::TransactionBehavior::Exclusive)?;
    txn.execute(
        "CREATE TABLE IF NOT EXISTS `schema_migrations` (\
         `version` INTEGER NOT NULL PRIMARY KEY, \
         `summary` TEXT NOT NULL, \
         `applied_at` INTEGER NOT NULL\
         ) STRICT",
        (),
    )?;

    // Another process may have migrated since the check above.
    let current = check_version(&txn, latest)?;
    for migration in migrations.iter().filter(|m| m.version > current) {
        info!(
            "{log_prefix} Migrating store schema to v{}: {}",
            migration.version, migration.summary,
        );
        txn.execute_batch(migration.sql)?;
        txn.execute(
            "INSERT INTO `schema_migrations` \
             (`version`, `summary`, `applied_at`) VALUES (?, ?, ?)",
            (migration.version, migration.summary, UnixTimestamp::now()),
        )?;
    }

    txn.commit().map_err(Error::Commit)?;
    Ok(())
}

/// Returns the schema version of the database, failing if it is newer than
/// `latest`.
fn check_version(
    cxn: &rusqlite::Connection,
    latest: u32,
) -> Result<u32, Error> {
    let exists = cxn
        .prepare_cached(
            "SELECT 1 FROM `sqlite_master` \
             WHERE `type` = 'table' AND `name` = 'schema_migrations'",
        )?
        .query_row((), |_| Ok(()))
        .optional()?
        .is_some();
    if !exists {
        return Ok(0);
    }

    let version = cxn
        .query_row(
            "SELECT MAX(`version`) FROM `schema_migrations`",
            (),
            from_single::<Option<u32>>,
        )?
        .unwrap_or(0);
    if version > latest {
        return Err(Error::UnsupportedVersion(version));
    }
    Ok(version)
}
