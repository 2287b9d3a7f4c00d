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

//! The store engine.
//!
//! A `Store` is one handle onto a store directory. Several handles, in the
//! same process or in different ones, may be open on the same directory at
//! once. Each handle has its own SQLite connection, its own caches and its
//! own notifier. Changes made through one handle reach the others through the
//! notification channel.
//!
//! Every operation which touches the database runs inside the retry wrapper
//! from `storage::retry`. Caches and notifications are only updated after the
//! transaction has committed, so a failed operation leaves no trace.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use bitflags::bitflags;
use log::{info, warn};

use crate::content::{ContentStore, FileContentStore};
use crate::key::{Key, Property, WhereClause};
use crate::model::{AccountId, FolderId, MessageId};
use crate::notify::{
    ChangeEvent, ChangeType, DeliveryFlag, EntityKind, Listener,
    NotificationChannel, Notifier, Origin, UnixChannel,
};
use crate::storage::{
    self,
    retry::{self, RetryPolicy},
    types::{from_row, FromRow},
};
use crate::support::{
    config::StoreConfig, error::Error, file_ops, log_prefix::LogPrefix,
};

mod accounts;
mod cache;
mod flags;
mod folders;
#[cfg(test)]
mod integration_tests;
mod messages;
mod removal;

use self::cache::Caches;
pub use self::flags::FlagContext;

/// Counters describing the work a store handle has done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Read operations which went to the database instead of being
    /// answered from a cache.
    pub backend_reads: u64,
    /// Transactions retried because the database was busy.
    pub retries: u64,
}

/// Whether removing messages leaves removal records behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalOption {
    NoRemovalRecord,
    CreateRemovalRecord,
}

/// Whether `query_messages_metadata` folds identical results together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnOption {
    NoDistinct,
    ReturnDistinct,
}

bitflags! {
    /// Selects the fields `query_messages_metadata` fills in.
    pub struct MessageProperties: u32 {
        const ID = 1 << 0;
        const TYPE = 1 << 1;
        const PARENT_FOLDER_ID = 1 << 2;
        const PREVIOUS_PARENT_FOLDER_ID = 1 << 3;
        const PARENT_ACCOUNT_ID = 1 << 4;
        const SENDER = 1 << 5;
        const RECIPIENTS = 1 << 6;
        const SUBJECT = 1 << 7;
        const TIMESTAMP = 1 << 8;
        const STATUS = 1 << 9;
        const FROM_MAILBOX = 1 << 10;
        const SERVER_UID = 1 << 11;
        const SIZE = 1 << 12;
        const CONTENT_TYPE = 1 << 13;
        const CONTENT_REF = 1 << 14;
    }
}

pub struct Store {
    log_prefix: LogPrefix,
    config: StoreConfig,
    policy: RetryPolicy,
    cxn: rusqlite::Connection,
    content: Box<dyn ContentStore>,
    caches: Caches,
    notifier: Notifier,
    flag_masks: HashMap<(FlagContext, String), u64>,
    stats: StoreStats,
}

impl Store {
    /// Opens the store in `config.path`, creating it if it does not exist.
    ///
    /// Bodies are kept as files under the store directory, and other
    /// processes opening the same directory are notified of changes through
    /// UNIX sockets.
    pub fn open(config: StoreConfig) -> Result<Self, Error> {
        create_store_dir(&config)?;
        let origin = Notifier::new_origin();
        let log_prefix = LogPrefix::new(config.name.clone());
        log_prefix.set_handle(origin.serno);

        let content =
            FileContentStore::new(config.content_path(), config.tmp_path())?;
        let channel = UnixChannel::bind(
            log_prefix.clone(),
            config.notify_path(),
            origin,
            config.notify.barrier_timeout(),
        )?;
        Self::open_impl(
            config,
            log_prefix,
            origin,
            Box::new(content),
            Box::new(channel),
        )
    }

    /// Opens the store in `config.path` with the given content store and
    /// notification channel.
    pub fn open_with(
        config: StoreConfig,
        content: Box<dyn ContentStore>,
        channel: Box<dyn NotificationChannel>,
    ) -> Result<Self, Error> {
        create_store_dir(&config)?;
        let origin = Notifier::new_origin();
        let log_prefix = LogPrefix::new(config.name.clone());
        log_prefix.set_handle(origin.serno);
        Self::open_impl(config, log_prefix, origin, content, channel)
    }

    fn open_impl(
        config: StoreConfig,
        log_prefix: LogPrefix,
        origin: Origin,
        content: Box<dyn ContentStore>,
        channel: Box<dyn NotificationChannel>,
    ) -> Result<Self, Error> {
        let mut stats = StoreStats::default();
        let cxn = storage::open(
            &config.db_path(),
            &config,
            &log_prefix,
            &mut stats.retries,
        )?;
        info!("{log_prefix} Opened store in {}", config.path.display());

        Ok(Self {
            policy: RetryPolicy::from(&config.retry),
            caches: Caches::new(&config.cache),
            notifier: Notifier::new(
                log_prefix.clone(),
                origin,
                &config.notify,
                channel,
            ),
            log_prefix,
            config,
            cxn,
            content,
            flag_masks: HashMap::new(),
            stats,
        })
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Registers a listener for every change made through this handle, and
    /// for changes from other handles applied by `process_notifications`.
    pub fn add_listener(&mut self, listener: impl Listener + 'static) {
        self.notifier.add_listener(Box::new(listener));
    }

    /// Sends coalesced changes to other handles once their window has
    /// passed.
    ///
    /// Every store operation does this as well. Long-lived idle handles
    /// should call it periodically.
    pub fn poll_notifications(&mut self) {
        self.notifier.poll();
    }

    /// Sends every pending change to the other handles, returning once they
    /// have all received it.
    ///
    /// Fails with the transient `Error::UndeliveredNotifications` if some
    /// peer does not accept them in time. Nothing is lost; a later call
    /// picks up where this one stopped.
    pub fn flush_notifications(&mut self) -> Result<(), Error> {
        self.notifier.flush()
    }

    /// Blocks for up to `timeout` until another handle sends a change.
    pub fn wait_for_notifications(
        &mut self,
        timeout: Duration,
    ) -> Result<bool, Error> {
        self.notifier.wait(timeout)
    }

    /// Applies the changes other handles have made since the last call.
    ///
    /// Cached entities which were updated or removed elsewhere are evicted,
    /// then the changes are passed to the listeners. Returns the number of
    /// events delivered.
    pub fn process_notifications(&mut self) -> Result<usize, Error> {
        self.notifier.poll();
        let events = self.notifier.receive()?;
        for event in &events {
            self.evict_foreign(event);
        }
        self.notifier.deliver_foreign(&events);
        Ok(events.len())
    }

    pub fn is_delivering_foreign(&self) -> bool {
        self.notifier.delivery_flag().is_set()
    }

    /// Returns a flag which reports, from anywhere, whether this handle is
    /// delivering changes made by another handle.
    pub fn delivery_flag(&self) -> DeliveryFlag {
        self.notifier.delivery_flag()
    }

    fn evict_foreign(&self, event: &ChangeEvent) {
        if !matches!(event.change, ChangeType::Updated | ChangeType::Removed) {
            return;
        }

        match event.kind {
            EntityKind::Account => {
                self.caches.evict_accounts(&ids_of(&event.ids, AccountId))
            },
            EntityKind::Folder => {
                self.caches.evict_folders(&ids_of(&event.ids, FolderId))
            },
            EntityKind::Message => {
                self.caches.evict_headers(&ids_of(&event.ids, MessageId))
            },
            EntityKind::RemovalRecord => (),
        }
    }

    fn emit<I: Into<i64> + Copy>(
        &mut self,
        change: ChangeType,
        kind: EntityKind,
        ids: &[I],
    ) {
        let ids = ids.iter().map(|&id| id.into()).collect::<Vec<i64>>();
        self.notifier.emit(change, kind, &ids);
    }

    /// Runs `f` in a write transaction through the retry wrapper.
    fn write<T>(
        &mut self,
        what: &'static str,
        f: impl FnMut(&rusqlite::Transaction<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.notifier.poll();
        let result = retry::write(
            &mut self.cxn,
            &self.policy,
            &self.log_prefix,
            what,
            &mut self.stats.retries,
            f,
        );
        self.notifier.poll();
        result
    }

    /// Runs `f` in a read transaction through the retry wrapper.
    fn read<T>(
        &mut self,
        what: &'static str,
        f: impl FnMut(&rusqlite::Transaction<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.notifier.poll();
        self.stats.backend_reads += 1;
        let result = retry::read(
            &mut self.cxn,
            &self.policy,
            &self.log_prefix,
            what,
            &mut self.stats.retries,
            f,
        );
        self.notifier.poll();
        result
    }

    fn where_clause<P: Property>(
        &self,
        key: &Key<P>,
    ) -> Result<WhereClause, Error> {
        key.to_sql(self.config.key.max_comparators)
    }

    /// Removes body blobs whose rows are already gone.
    ///
    /// The database is authoritative at this point, so failures only leave
    /// garbage behind and are logged rather than returned.
    fn purge_content<'a>(&self, refs: impl IntoIterator<Item = &'a String>) {
        for content_ref in refs {
            if let Err(e) = self.content.remove(content_ref) {
                warn!(
                    "{} Failed to remove content {content_ref}: {e}",
                    self.log_prefix,
                );
            }
        }
    }
}

fn create_store_dir(config: &StoreConfig) -> Result<(), Error> {
    file_ops::ensure_dir(&config.path, 0o700)?;
    Ok(())
}

fn ids_of<T>(raw: &[i64], f: impl Fn(i64) -> T) -> Vec<T> {
    raw.iter().copied().map(f).collect()
}

/// Renders `ids` as an inline SQL list, e.g. `(1, 2, 3)`.
///
/// An empty list renders as `(NULL)`, which matches nothing.
fn sql_list<I: Into<i64> + Copy>(ids: &[I]) -> String {
    if ids.is_empty() {
        return "(NULL)".to_owned();
    }

    let mut s = "(".to_owned();
    for (ix, &id) in ids.iter().enumerate() {
        if ix > 0 {
            s.push_str(", ");
        }
        let _ = write!(s, "{}", id.into());
    }
    s.push(')');
    s
}

/// Runs `sql` with the values of `clause` bound, collecting every row.
fn query_rows<T: FromRow>(
    txn: &rusqlite::Transaction<'_>,
    sql: &str,
    clause: &WhereClause,
) -> Result<Vec<T>, Error> {
    let mut stmt = txn.prepare(sql)?;
    let rows = stmt
        .query_map(clause.params(), from_row::<T>)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Sorts and deduplicates `v`, dropping invalid ids.
fn distinct_valid<T: Ord + Copy + Into<i64>>(mut v: Vec<T>) -> Vec<T> {
    v.retain(|&id| 0 != id.into());
    v.sort_unstable();
    v.dedup();
    v
}
