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

use moka::sync::Cache;

use crate::model::*;
use crate::support::config::CacheConfig;

/// The bounded caches of one store handle.
pub(super) struct Caches {
    pub(super) accounts: Cache<AccountId, Account>,
    pub(super) folders: Cache<FolderId, Folder>,
    pub(super) headers: Cache<MessageId, MessageMetaData>,
    /// The result of the most recent `query_messages`, which drives the
    /// preload window.
    last_query: Vec<MessageId>,
    look_ahead: usize,
}

impl Caches {
    pub(super) fn new(config: &CacheConfig) -> Self {
        Self {
            accounts: Cache::new(config.account_capacity),
            folders: Cache::new(config.folder_capacity),
            headers: Cache::new(config.header_capacity),
            last_query: Vec::new(),
            look_ahead: config.look_ahead,
        }
    }

    pub(super) fn set_last_query(&mut self, ids: &[MessageId]) {
        self.last_query.clear();
        self.last_query.extend_from_slice(ids);
    }

    /// Returns the ids to load from the database on a header cache miss for
    /// `id`. `id` itself is always the first element.
    ///
    /// If `id` is part of the last query result, its uncached neighbours are
    /// added alternately from above and below until the batch holds twice
    /// the look-ahead. A direction ends at the end of the result or at the
    /// first neighbour which is already cached. If `id` is not part of the
    /// last query result, that result is forgotten.
    pub(super) fn preload_batch(&mut self, id: MessageId) -> Vec<MessageId> {
        let mut batch = vec![id];
        let Some(pos) = self.last_query.iter().position(|&q| q == id) else {
            self.last_query.clear();
            return batch;
        };

        let limit = (2 * self.look_ahead).max(1);
        let (mut above, mut below) = (pos, pos);
        let (mut up_open, mut down_open) = (true, true);

        while batch.len() < limit && (up_open || down_open) {
            if up_open {
                match self.last_query.get(above + 1) {
                    Some(&next) if !self.headers.contains_key(&next) => {
                        above += 1;
                        batch.push(next);
                    },
                    _ => up_open = false,
                }
            }

            if batch.len() >= limit {
                break;
            }

            if down_open {
                match below.checked_sub(1).map(|b| (b, self.last_query[b])) {
                    Some((b, prev)) if !self.headers.contains_key(&prev) => {
                        below = b;
                        batch.push(prev);
                    },
                    _ => down_open = false,
                }
            }
        }

        batch
    }

    pub(super) fn put_account(&self, account: &Account) {
        self.accounts.insert(account.id, account.clone());
    }

    pub(super) fn put_folder(&self, folder: &Folder) {
        self.folders.insert(folder.id, folder.clone());
    }

    pub(super) fn put_header(&self, meta: &MessageMetaData) {
        let mut meta = meta.clone();
        meta.data_modified = false;
        self.headers.insert(meta.id, meta);
    }

    pub(super) fn evict_accounts(&self, ids: &[AccountId]) {
        for id in ids {
            self.accounts.invalidate(id);
        }
    }

    pub(super) fn evict_folders(&self, ids: &[FolderId]) {
        for id in ids {
            self.folders.invalidate(id);
        }
    }

    pub(super) fn evict_headers(&self, ids: &[MessageId]) {
        for id in ids {
            self.headers.invalidate(id);
        }
    }
}
