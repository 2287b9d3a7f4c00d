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

//! Folders and the folder hierarchy.
//!
//! The hierarchy is materialised in `folder_ancestor_links`, which holds one
//! row for every folder and every folder above it. The table is kept exact
//! through additions, reparenting and removals so that "is this folder below
//! that one" never needs a recursive query.

use rusqlite::OptionalExtension as _;

use super::accounts;
use super::messages::{self, Doomed};
use super::*;
use crate::key::{FolderKey, FolderSortKey};
use crate::model::{Folder, FolderId};
use crate::storage::types::{from_single, StatusBits};

impl Store {
    /// Adds `folder` to the store, setting its id.
    pub fn add_folder(&mut self, folder: &mut Folder) -> Result<(), Error> {
        let id = self.write("add_folder", |txn| {
            if folder.id.is_valid() && folder_exists(txn, folder.id)? {
                return Err(Error::AlreadyExists);
            }
            check_parents(txn, folder)?;

            txn.execute(
                "INSERT INTO `folders` \
                 (`name`, `parent_id`, `parent_account_id`, \
                  `display_name`, `status`) \
                 VALUES (?, ?, ?, ?, ?)",
                (
                    &folder.name,
                    folder.parent_id,
                    folder.parent_account_id,
                    &folder.display_name,
                    StatusBits(folder.status),
                ),
            )?;
            let id = FolderId(txn.last_insert_rowid());
            if folder.parent_id.is_valid() {
                link_subtree(txn, &[id], folder.parent_id)?;
            }
            Ok(id)
        })?;

        folder.id = id;
        self.caches.put_folder(folder);
        self.emit(ChangeType::Added, EntityKind::Folder, &[id]);
        self.emit(
            ChangeType::ContentsModified,
            EntityKind::Account,
            &distinct_valid(vec![folder.parent_account_id]),
        );
        Ok(())
    }

    /// Writes `folder` back to the store.
    ///
    /// If the parent changes, the folder moves together with all folders
    /// below it.
    pub fn update_folder(&mut self, folder: &mut Folder) -> Result<(), Error> {
        let old = self.write("update_folder", |txn| {
            let old = load_folder(txn, folder.id)?;
            if folder.id == folder.parent_id {
                return Err(Error::FolderIsOwnParent);
            }
            let moved_or_renamed =
                old.name != folder.name || old.parent_id != folder.parent_id;
            if folder.id.is_standard() && moved_or_renamed {
                return Err(Error::StandardFolder);
            }
            check_parents(txn, folder)?;

            txn.execute(
                "UPDATE `folders` SET \
                 `name` = ?, `parent_id` = ?, `parent_account_id` = ?, \
                 `display_name` = ?, `status` = ? \
                 WHERE `id` = ?",
                (
                    &folder.name,
                    folder.parent_id,
                    folder.parent_account_id,
                    &folder.display_name,
                    StatusBits(folder.status),
                    folder.id,
                ),
            )?;

            if old.parent_id != folder.parent_id {
                let subtree = descendants_and_self(txn, &[folder.id])?;
                unlink_subtree(txn, &subtree)?;
                if folder.parent_id.is_valid() {
                    link_subtree(txn, &subtree, folder.parent_id)?;
                }
            }
            Ok(old)
        })?;

        self.caches.put_folder(folder);
        self.emit(ChangeType::Updated, EntityKind::Folder, &[folder.id]);
        if old.parent_id != folder.parent_id {
            self.emit(
                ChangeType::ContentsModified,
                EntityKind::Folder,
                &distinct_valid(vec![old.parent_id, folder.parent_id]),
            );
        }
        self.emit(
            ChangeType::ContentsModified,
            EntityKind::Account,
            &distinct_valid(vec![
                old.parent_account_id,
                folder.parent_account_id,
            ]),
        );
        Ok(())
    }

    pub fn remove_folder(
        &mut self,
        id: FolderId,
        option: RemovalOption,
    ) -> Result<(), Error> {
        self.remove_folders(&FolderKey::id(id), option)
    }

    /// Removes every folder matching `key`, the folders below them, and all
    /// messages within any of those folders.
    pub fn remove_folders(
        &mut self,
        key: &FolderKey,
        option: RemovalOption,
    ) -> Result<(), Error> {
        let clause = self.where_clause(key)?;
        let removed = self.write("remove_folders", |txn| {
            let matched = query_rows::<(FolderId,)>(
                txn,
                &format!("SELECT `id` FROM `folders` WHERE {}", clause.sql),
                &clause,
            )?
            .into_iter()
            .map(|(id,)| id)
            .collect::<Vec<_>>();

            if matched.is_empty() {
                return Err(Error::NothingToRemove);
            }
            if matched.iter().any(|id| id.is_standard()) {
                return Err(Error::StandardFolder);
            }

            let folders = descendants_and_self(txn, &matched)?;
            let list = sql_list(&folders);
            let rows = txn
                .prepare(&format!(
                    "SELECT `parent_id`, `parent_account_id` \
                     FROM `folders` WHERE `id` IN {list}",
                ))?
                .query_map((), from_row::<(FolderId, AccountId)>)?
                .collect::<Result<Vec<_>, _>>()?;
            let doomed = messages::delete_where(
                txn,
                &format!("`parent_folder_id` IN {list}"),
                option,
            )?;

            txn.execute(
                &format!(
                    "DELETE FROM `folder_ancestor_links` \
                     WHERE `descendant_id` IN {list} \
                     OR `ancestor_id` IN {list}",
                ),
                (),
            )?;
            txn.execute(
                &format!("DELETE FROM `folders` WHERE `id` IN {list}"),
                (),
            )?;

            Ok(RemovedFolders {
                folders,
                parents: rows.iter().map(|&(p, _)| p).collect(),
                accounts: rows.iter().map(|&(_, a)| a).collect(),
                messages: doomed,
            })
        })?;

        let RemovedFolders {
            folders,
            mut parents,
            mut accounts,
            messages,
        } = removed;
        parents.retain(|p| !folders.contains(p));

        self.caches.evict_folders(&folders);
        self.forget_messages(&messages);
        accounts.extend(messages.iter().map(|m| m.account));

        let message_ids = messages.iter().map(|m| m.id).collect::<Vec<_>>();
        self.emit(ChangeType::Removed, EntityKind::Message, &message_ids);
        self.emit(ChangeType::Removed, EntityKind::Folder, &folders);
        self.emit(
            ChangeType::ContentsModified,
            EntityKind::Folder,
            &distinct_valid(parents),
        );
        if RemovalOption::CreateRemovalRecord == option {
            self.emit(
                ChangeType::Added,
                EntityKind::RemovalRecord,
                &distinct_valid(messages.iter().map(|m| m.account).collect()),
            );
        }
        self.emit(
            ChangeType::ContentsModified,
            EntityKind::Account,
            &distinct_valid(accounts),
        );
        Ok(())
    }

    pub fn folder(&mut self, id: FolderId) -> Result<Folder, Error> {
        if let Some(folder) = self.caches.folders.get(&id) {
            return Ok(folder);
        }

        let folder = self.read("folder", |txn| load_folder(txn, id))?;
        self.caches.put_folder(&folder);
        Ok(folder)
    }

    pub fn query_folders(
        &mut self,
        key: &FolderKey,
        sort: &FolderSortKey,
    ) -> Result<Vec<Folder>, Error> {
        let clause = self.where_clause(key)?;
        let sql = format!(
            "SELECT * FROM `folders` WHERE {} {}",
            clause.sql,
            sort.to_sql()?,
        );
        let folders = self.read("query_folders", |txn| {
            query_rows::<Folder>(txn, &sql, &clause)
        })?;

        for folder in &folders {
            self.caches.put_folder(folder);
        }
        Ok(folders)
    }

    pub fn count_folders(&mut self, key: &FolderKey) -> Result<usize, Error> {
        let clause = self.where_clause(key)?;
        let sql =
            format!("SELECT COUNT(*) FROM `folders` WHERE {}", clause.sql);
        self.read("count_folders", |txn| {
            let count =
                txn.query_row(&sql, clause.params(), from_single::<i64>)?;
            Ok(count as usize)
        })
    }

    /// Returns every folder above any of `folders`, in ascending id order.
    pub fn folder_ancestor_ids(
        &mut self,
        folders: &[FolderId],
    ) -> Result<Vec<FolderId>, Error> {
        let list = sql_list(folders);
        self.read("folder_ancestor_ids", |txn| {
            let ids = txn
                .prepare(&format!(
                    "SELECT DISTINCT `ancestor_id` \
                     FROM `folder_ancestor_links` \
                     WHERE `descendant_id` IN {list} \
                     ORDER BY `ancestor_id`",
                ))?
                .query_map((), from_single::<FolderId>)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Returns the distinct owning accounts of the folders matching `key`.
    pub fn folder_account_ids(
        &mut self,
        key: &FolderKey,
    ) -> Result<Vec<AccountId>, Error> {
        let clause = self.where_clause(key)?;
        let sql = format!(
            "SELECT DISTINCT `parent_account_id` FROM `folders` \
             WHERE {} AND `parent_account_id` <> 0 \
             ORDER BY `parent_account_id`",
            clause.sql,
        );
        self.read("folder_account_ids", |txn| {
            query_rows::<(AccountId,)>(txn, &sql, &clause)
                .map(|rows| rows.into_iter().map(|(id,)| id).collect())
        })
    }

    /// Drops everything cached about messages that no longer exist, and
    /// their bodies.
    pub(super) fn forget_messages(&mut self, doomed: &[Doomed]) {
        let ids = doomed.iter().map(|m| m.id).collect::<Vec<_>>();
        self.caches.evict_headers(&ids);
        let refs = doomed
            .iter()
            .filter_map(|m| m.content_ref.clone())
            .collect::<Vec<_>>();
        self.purge_content(&refs);
    }
}

struct RemovedFolders {
    folders: Vec<FolderId>,
    parents: Vec<FolderId>,
    accounts: Vec<AccountId>,
    messages: Vec<Doomed>,
}

pub(super) fn load_folder(
    txn: &rusqlite::Transaction<'_>,
    id: FolderId,
) -> Result<Folder, Error> {
    txn.prepare_cached("SELECT * FROM `folders` WHERE `id` = ?")?
        .query_row((id,), from_row::<Folder>)
        .optional()?
        .ok_or(Error::NxFolder)
}

pub(super) fn folder_exists(
    txn: &rusqlite::Transaction<'_>,
    id: FolderId,
) -> Result<bool, Error> {
    txn.prepare_cached("SELECT 1 FROM `folders` WHERE `id` = ?")?
        .exists((id,))
        .map_err(Into::into)
}

fn check_parents(
    txn: &rusqlite::Transaction<'_>,
    folder: &Folder,
) -> Result<(), Error> {
    if folder.parent_id.is_valid() && !folder_exists(txn, folder.parent_id)? {
        return Err(Error::NxFolder);
    }
    if folder.parent_account_id.is_valid()
        && !accounts::account_exists(txn, folder.parent_account_id)?
    {
        return Err(Error::NxAccount);
    }
    Ok(())
}

/// Returns `folders` together with every folder above any of them.
pub(super) fn ancestors_and_self(
    txn: &rusqlite::Transaction<'_>,
    folders: &[FolderId],
) -> Result<Vec<FolderId>, Error> {
    let mut ids = txn
        .prepare(&format!(
            "SELECT `ancestor_id` FROM `folder_ancestor_links` \
             WHERE `descendant_id` IN {}",
            sql_list(folders),
        ))?
        .query_map((), from_single::<FolderId>)?
        .collect::<Result<Vec<_>, _>>()?;
    ids.extend_from_slice(folders);
    Ok(distinct_valid(ids))
}

/// Returns `folders` together with every folder below any of them.
pub(super) fn descendants_and_self(
    txn: &rusqlite::Transaction<'_>,
    folders: &[FolderId],
) -> Result<Vec<FolderId>, Error> {
    let mut ids = txn
        .prepare(&format!(
            "SELECT `descendant_id` FROM `folder_ancestor_links` \
             WHERE `ancestor_id` IN {}",
            sql_list(folders),
        ))?
        .query_map((), from_single::<FolderId>)?
        .collect::<Result<Vec<_>, _>>()?;
    ids.extend_from_slice(folders);
    Ok(distinct_valid(ids))
}

/// Removes the links from folders outside `subtree` to folders inside it.
///
/// Links within the subtree stay valid when the subtree moves as a whole.
fn unlink_subtree(
    txn: &rusqlite::Transaction<'_>,
    subtree: &[FolderId],
) -> Result<(), Error> {
    let list = sql_list(subtree);
    txn.execute(
        &format!(
            "DELETE FROM `folder_ancestor_links` \
             WHERE `descendant_id` IN {list} \
             AND `ancestor_id` NOT IN {list}",
        ),
        (),
    )?;
    Ok(())
}

/// Links every folder of `subtree` below `parent` and everything above
/// `parent`.
fn link_subtree(
    txn: &rusqlite::Transaction<'_>,
    subtree: &[FolderId],
    parent: FolderId,
) -> Result<(), Error> {
    txn.execute(
        &format!(
            "INSERT OR IGNORE INTO `folder_ancestor_links` \
             (`ancestor_id`, `descendant_id`) \
             SELECT `a`.`id`, `d`.`id` \
             FROM (SELECT ?1 AS `id` \
                   UNION SELECT `ancestor_id` FROM `folder_ancestor_links` \
                   WHERE `descendant_id` = ?1) AS `a`, \
                  (SELECT `id` FROM `folders` WHERE `id` IN {}) AS `d`",
            sql_list(subtree),
        ),
        (parent,),
    )?;
    Ok(())
}
