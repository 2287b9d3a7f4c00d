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

use std::collections::HashSet;
use std::time::UNIX_EPOCH;

use chrono::prelude::*;
use rusqlite::{named_params, OptionalExtension as _};

use super::{accounts, folders};
use super::*;
use crate::content::{decode_body, encode_body, new_content_ref};
use crate::key::{MessageKey, MessageSortKey};
use crate::model::{Message, MessageBody, MessageMetaData};
use crate::storage::types::{
    from_single, join_recipients, StatusBits, UnixTimestamp,
};

/// What remains known about a message deleted within a transaction.
pub(super) struct Doomed {
    pub(super) id: MessageId,
    pub(super) folder: FolderId,
    pub(super) account: AccountId,
    pub(super) content_ref: Option<String>,
}

impl FromRow for Doomed {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            folder: row.get("parent_folder_id")?,
            account: row.get("parent_account_id")?,
            content_ref: row.get("content_ref")?,
        })
    }
}

/// A message touched by a bulk update.
struct Touched {
    id: MessageId,
    folders: [FolderId; 2],
    account: AccountId,
}

#[derive(Default)]
struct BulkUpdate {
    messages: Vec<MessageId>,
    folders: Vec<FolderId>,
    accounts: Vec<AccountId>,
}

impl Store {
    /// Adds `message` and its body to the store, setting its id.
    pub fn add_message(&mut self, message: &mut Message) -> Result<(), Error> {
        let content_ref = self.write_body(message.body())?;
        let previous_ref = std::mem::replace(
            &mut message.meta.content_ref,
            content_ref.clone(),
        );

        match self.insert_message(&mut message.meta) {
            Ok(()) => {
                message.clear_modified();
                Ok(())
            },
            Err(e) => {
                message.meta.content_ref = previous_ref;
                self.purge_content(content_ref.as_ref());
                Err(e)
            },
        }
    }

    /// Adds a message without a body, setting its id.
    pub fn add_message_metadata(
        &mut self,
        meta: &mut MessageMetaData,
    ) -> Result<(), Error> {
        self.insert_message(meta)
    }

    /// Writes the modified parts of `message` back to the store.
    ///
    /// Fails with `NothingToUpdate` if neither the metadata nor the body has
    /// been modified.
    pub fn update_message(
        &mut self,
        message: &mut Message,
    ) -> Result<(), Error> {
        if !message.meta.data_modified && !message.is_content_modified() {
            return Err(Error::NothingToUpdate);
        }

        let caller_ref = message.meta.content_ref.clone();
        let new_ref = if message.is_content_modified() {
            let new_ref = self.write_body(message.body())?;
            message.meta.content_ref = new_ref.clone();
            new_ref
        } else {
            None
        };

        match self.write_message_update(&mut message.meta) {
            Ok(old) => {
                if message.is_content_modified()
                    && old.content_ref != message.meta.content_ref
                {
                    self.purge_content(old.content_ref.as_ref());
                }
                message.clear_modified();
                Ok(())
            },
            Err(e) => {
                message.meta.content_ref = caller_ref;
                self.purge_content(new_ref.as_ref());
                Err(e)
            },
        }
    }

    /// Writes `meta` back to the store.
    ///
    /// Fails with `NothingToUpdate` unless `meta.data_modified` is set.
    pub fn update_message_metadata(
        &mut self,
        meta: &mut MessageMetaData,
    ) -> Result<(), Error> {
        if !meta.data_modified {
            return Err(Error::NothingToUpdate);
        }

        self.write_message_update(meta).map(|_| ())
    }

    /// Sets (`set == true`) or clears the bits of `mask` in the status of
    /// every message matching `key`.
    pub fn update_messages_status(
        &mut self,
        key: &MessageKey,
        mask: u64,
        set: bool,
    ) -> Result<(), Error> {
        let clause = self.where_clause(key)?;
        let select = format!(
            "SELECT `id`, `parent_folder_id`, `parent_folder_id`, \
             `parent_account_id` FROM `messages` WHERE {} ORDER BY `id`",
            clause.sql,
        );
        let update = format!(
            "UPDATE `messages` SET `status` = {} WHERE `id` IN ",
            if set {
                "`status` | ?"
            } else {
                "`status` & ~?"
            },
        );

        let result = self.write("update_messages_status", |txn| {
            bulk_update(txn, &select, &clause, |txn, list| {
                txn.execute(&format!("{update}{list}"), (StatusBits(mask),))?;
                Ok(())
            })
        })?;
        self.finish_bulk_update(result);
        Ok(())
    }

    /// Moves every message matching `key` into `folder`, remembering where
    /// each one came from.
    pub fn move_messages(
        &mut self,
        key: &MessageKey,
        folder: FolderId,
    ) -> Result<(), Error> {
        if !folder.is_valid() {
            return Err(Error::InvalidParentFolder);
        }

        let clause = self.where_clause(key)?;
        let select = format!(
            "SELECT `id`, `parent_folder_id`, {folder}, \
             `parent_account_id` FROM `messages` \
             WHERE ({}) AND `parent_folder_id` <> {folder} ORDER BY `id`",
            clause.sql,
            folder = folder.0,
        );

        let result = self.write("move_messages", |txn| {
            if !folders::folder_exists(txn, folder)? {
                return Err(Error::NxFolder);
            }

            bulk_update(txn, &select, &clause, |txn, list| {
                txn.execute(
                    &format!(
                        "UPDATE `messages` SET \
                         `previous_parent_folder_id` = `parent_folder_id`, \
                         `parent_folder_id` = ? \
                         WHERE `id` IN {list}",
                    ),
                    (folder,),
                )?;
                Ok(())
            })
        })?;
        self.finish_bulk_update(result);
        Ok(())
    }

    /// Moves every message matching `key` back into the folder it was last
    /// moved out of.
    ///
    /// Messages without a previous folder, or whose previous folder no longer
    /// exists, stay where they are.
    pub fn restore_to_previous_folder(
        &mut self,
        key: &MessageKey,
    ) -> Result<(), Error> {
        let clause = self.where_clause(key)?;
        let select = format!(
            "SELECT `id`, `parent_folder_id`, `previous_parent_folder_id`, \
             `parent_account_id` FROM `messages` \
             WHERE ({}) AND `previous_parent_folder_id` <> 0 \
             AND `previous_parent_folder_id` IN (SELECT `id` FROM `folders`) \
             ORDER BY `id`",
            clause.sql,
        );

        let result = self.write("restore_to_previous_folder", |txn| {
            bulk_update(txn, &select, &clause, |txn, list| {
                txn.execute(
                    &format!(
                        "UPDATE `messages` SET \
                         `parent_folder_id` = `previous_parent_folder_id`, \
                         `previous_parent_folder_id` = 0 \
                         WHERE `id` IN {list}",
                    ),
                    (),
                )?;
                Ok(())
            })
        })?;
        self.finish_bulk_update(result);
        Ok(())
    }

    pub fn remove_message(
        &mut self,
        id: MessageId,
        option: RemovalOption,
    ) -> Result<(), Error> {
        self.remove_messages(&MessageKey::id(id), option)
    }

    /// Removes every message matching `key`, optionally leaving removal
    /// records behind.
    pub fn remove_messages(
        &mut self,
        key: &MessageKey,
        option: RemovalOption,
    ) -> Result<(), Error> {
        let clause = self.where_clause(key)?;
        let select =
            format!("SELECT `id` FROM `messages` WHERE {}", clause.sql);

        let (doomed, folders) = self.write("remove_messages", |txn| {
            let ids = query_rows::<(MessageId,)>(txn, &select, &clause)?
                .into_iter()
                .map(|(id,)| id)
                .collect::<Vec<_>>();
            if ids.is_empty() {
                return Err(Error::NothingToRemove);
            }

            let doomed = delete_where(
                txn,
                &format!("`id` IN {}", sql_list(&ids)),
                option,
            )?;
            let folders = folders::ancestors_and_self(
                txn,
                &doomed.iter().map(|m| m.folder).collect::<Vec<_>>(),
            )?;
            Ok((doomed, folders))
        })?;

        self.forget_messages(&doomed);
        let ids = doomed.iter().map(|m| m.id).collect::<Vec<_>>();
        let accounts =
            distinct_valid(doomed.iter().map(|m| m.account).collect());
        self.emit(ChangeType::Removed, EntityKind::Message, &ids);
        self.emit(ChangeType::ContentsModified, EntityKind::Folder, &folders);
        if RemovalOption::CreateRemovalRecord == option {
            self.emit(ChangeType::Added, EntityKind::RemovalRecord, &accounts);
        }
        self.emit(ChangeType::ContentsModified, EntityKind::Account, &accounts);
        Ok(())
    }

    /// Returns the message with the given id along with its body.
    pub fn message(&mut self, id: MessageId) -> Result<Message, Error> {
        let meta = self.message_metadata(id)?;
        let body = match meta.content_ref {
            Some(ref content_ref) => {
                decode_body(&self.content.read(content_ref)?)?
            },
            None => MessageBody::default(),
        };
        Ok(Message::from_parts(meta, body))
    }

    /// Returns the metadata of the message with the given id.
    ///
    /// On a cache miss, the neighbours of the message in the result of the
    /// last `query_messages` are loaded along with it.
    pub fn message_metadata(
        &mut self,
        id: MessageId,
    ) -> Result<MessageMetaData, Error> {
        if let Some(meta) = self.caches.headers.get(&id) {
            return Ok(meta);
        }

        let batch = self.caches.preload_batch(id);
        let sql = format!(
            "SELECT * FROM `messages` WHERE `id` IN {}",
            sql_list(&batch),
        );
        let loaded = self.read("message_metadata", |txn| {
            let rows = txn
                .prepare(&sql)?
                .query_map((), from_row::<MessageMetaData>)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut found = None;
        for meta in loaded {
            self.caches.put_header(&meta);
            if meta.id == id {
                found = Some(meta);
            }
        }
        found.ok_or(Error::NxMessage)
    }

    pub fn message_by_server_uid(
        &mut self,
        server_uid: &str,
        account: AccountId,
    ) -> Result<MessageMetaData, Error> {
        let meta = self.read("message_by_server_uid", |txn| {
            txn.prepare_cached(
                "SELECT * FROM `messages` \
                 WHERE `server_uid` = ? AND `parent_account_id` = ? \
                 ORDER BY `id` LIMIT 1",
            )?
            .query_row((server_uid, account), from_row::<MessageMetaData>)
            .optional()?
            .ok_or(Error::NxMessage)
        })?;

        self.caches.put_header(&meta);
        Ok(meta)
    }

    /// Returns the ids of the messages matching `key`, in the order given by
    /// `sort`.
    pub fn query_messages(
        &mut self,
        key: &MessageKey,
        sort: &MessageSortKey,
    ) -> Result<Vec<MessageId>, Error> {
        let clause = self.where_clause(key)?;
        let sql = format!(
            "SELECT `id` FROM `messages` WHERE {} {}",
            clause.sql,
            sort.to_sql()?,
        );
        let ids = self.read("query_messages", |txn| {
            query_rows::<(MessageId,)>(txn, &sql, &clause).map(|rows| {
                rows.into_iter().map(|(id,)| id).collect::<Vec<_>>()
            })
        })?;

        self.caches.set_last_query(&ids);
        Ok(ids)
    }

    /// Returns the selected `properties` of the messages matching `key`, in
    /// id order. Fields not selected hold their default values.
    ///
    /// With `ReturnOption::ReturnDistinct`, equal results are returned only
    /// once.
    pub fn query_messages_metadata(
        &mut self,
        key: &MessageKey,
        properties: MessageProperties,
        option: ReturnOption,
    ) -> Result<Vec<MessageMetaData>, Error> {
        let clause = self.where_clause(key)?;
        let sql = format!(
            "SELECT * FROM `messages` WHERE {} ORDER BY `id`",
            clause.sql,
        );
        let rows = self.read("query_messages_metadata", |txn| {
            query_rows::<MessageMetaData>(txn, &sql, &clause)
        })?;

        let mut results = Vec::<MessageMetaData>::with_capacity(rows.len());
        let mut seen = HashSet::<MessageMetaData>::new();
        for meta in rows {
            let projected = properties.project(meta);
            if ReturnOption::NoDistinct == option
                || seen.insert(projected.clone())
            {
                results.push(projected);
            }
        }
        Ok(results)
    }

    pub fn count_messages(&mut self, key: &MessageKey) -> Result<usize, Error> {
        let clause = self.where_clause(key)?;
        let sql =
            format!("SELECT COUNT(*) FROM `messages` WHERE {}", clause.sql);
        self.read("count_messages", |txn| {
            let count =
                txn.query_row(&sql, clause.params(), from_single::<i64>)?;
            Ok(count as usize)
        })
    }

    /// Returns the total size of the messages matching `key`.
    pub fn size_of_messages(&mut self, key: &MessageKey) -> Result<u64, Error> {
        let clause = self.where_clause(key)?;
        let sql = format!(
            "SELECT IFNULL(SUM(`size`), 0) FROM `messages` WHERE {}",
            clause.sql,
        );
        self.read("size_of_messages", |txn| {
            let size =
                txn.query_row(&sql, clause.params(), from_single::<i64>)?;
            Ok(size as u64)
        })
    }

    /// Returns the distinct parent folders of the messages matching `key`.
    pub fn message_folder_ids(
        &mut self,
        key: &MessageKey,
    ) -> Result<Vec<FolderId>, Error> {
        let clause = self.where_clause(key)?;
        let sql = format!(
            "SELECT DISTINCT `parent_folder_id` FROM `messages` \
             WHERE {} ORDER BY `parent_folder_id`",
            clause.sql,
        );
        self.read("message_folder_ids", |txn| {
            query_rows::<(FolderId,)>(txn, &sql, &clause)
                .map(|rows| rows.into_iter().map(|(id,)| id).collect())
        })
    }

    /// Returns the distinct parent accounts of the messages matching `key`.
    pub fn message_account_ids(
        &mut self,
        key: &MessageKey,
    ) -> Result<Vec<AccountId>, Error> {
        let clause = self.where_clause(key)?;
        let sql = format!(
            "SELECT DISTINCT `parent_account_id` FROM `messages` \
             WHERE {} ORDER BY `parent_account_id`",
            clause.sql,
        );
        self.read("message_account_ids", |txn| {
            query_rows::<(AccountId,)>(txn, &sql, &clause)
                .map(|rows| rows.into_iter().map(|(id,)| id).collect())
        })
    }

    fn write_body(&self, body: &MessageBody) -> Result<Option<String>, Error> {
        if body.is_empty() {
            return Ok(None);
        }

        let content_ref = new_content_ref();
        self.content.write(&content_ref, &encode_body(body)?)?;
        Ok(Some(content_ref))
    }

    fn insert_message(
        &mut self,
        meta: &mut MessageMetaData,
    ) -> Result<(), Error> {
        let (id, folders) = self.write("add_message", |txn| {
            if meta.id.is_valid() && message_exists(txn, meta.id)? {
                return Err(Error::AlreadyExists);
            }
            check_parents(txn, meta)?;

            txn.execute(
                "INSERT INTO `messages` (\
                 `type`, `parent_folder_id`, `previous_parent_folder_id`, \
                 `sender`, `recipients`, `subject`, `timestamp`, `status`, \
                 `parent_account_id`, `from_mailbox`, `content_ref`, \
                 `server_uid`, `size`, `content_type`\
                 ) VALUES (\
                 :type, :parent_folder_id, :previous_parent_folder_id, \
                 :sender, :recipients, :subject, :timestamp, :status, \
                 :parent_account_id, :from_mailbox, :content_ref, \
                 :server_uid, :size, :content_type)",
                named_params! {
                    ":type": meta.message_type,
                    ":parent_folder_id": meta.parent_folder_id,
                    ":previous_parent_folder_id":
                        meta.previous_parent_folder_id,
                    ":sender": meta.sender,
                    ":recipients": join_recipients(&meta.recipients),
                    ":subject": meta.subject,
                    ":timestamp": UnixTimestamp(meta.timestamp),
                    ":status": StatusBits(meta.status),
                    ":parent_account_id": meta.parent_account_id,
                    ":from_mailbox": meta.from_mailbox,
                    ":content_ref": meta.content_ref,
                    ":server_uid": meta.server_uid,
                    ":size": meta.size,
                    ":content_type": meta.content_type,
                },
            )?;
            let id = MessageId(txn.last_insert_rowid());
            let folders =
                folders::ancestors_and_self(txn, &[meta.parent_folder_id])?;
            Ok((id, folders))
        })?;

        meta.id = id;
        meta.data_modified = false;
        self.caches.put_header(meta);
        self.emit(ChangeType::Added, EntityKind::Message, &[id]);
        self.emit(ChangeType::ContentsModified, EntityKind::Folder, &folders);
        self.emit(
            ChangeType::ContentsModified,
            EntityKind::Account,
            &[meta.parent_account_id],
        );
        Ok(())
    }

    /// Writes the metadata of an existing message, returning the metadata it
    /// replaced.
    fn write_message_update(
        &mut self,
        meta: &mut MessageMetaData,
    ) -> Result<MessageMetaData, Error> {
        let (old, previous, folders) =
            self.write("update_message", |txn| {
                let old = load_message(txn, meta.id)?;
                check_parents(txn, meta)?;

                let moved = old.parent_folder_id != meta.parent_folder_id;
                let previous = if moved {
                    old.parent_folder_id
                } else {
                    meta.previous_parent_folder_id
                };

                txn.execute(
                    "UPDATE `messages` SET \
                     `type` = :type, \
                     `parent_folder_id` = :parent_folder_id, \
                     `previous_parent_folder_id` = \
                       :previous_parent_folder_id, \
                     `sender` = :sender, \
                     `recipients` = :recipients, \
                     `subject` = :subject, \
                     `timestamp` = :timestamp, \
                     `status` = :status, \
                     `parent_account_id` = :parent_account_id, \
                     `from_mailbox` = :from_mailbox, \
                     `content_ref` = :content_ref, \
                     `server_uid` = :server_uid, \
                     `size` = :size, \
                     `content_type` = :content_type \
                     WHERE `id` = :id",
                    named_params! {
                        ":type": meta.message_type,
                        ":parent_folder_id": meta.parent_folder_id,
                        ":previous_parent_folder_id": previous,
                        ":sender": meta.sender,
                        ":recipients": join_recipients(&meta.recipients),
                        ":subject": meta.subject,
                        ":timestamp": UnixTimestamp(meta.timestamp),
                        ":status": StatusBits(meta.status),
                        ":parent_account_id": meta.parent_account_id,
                        ":from_mailbox": meta.from_mailbox,
                        ":content_ref": meta.content_ref,
                        ":server_uid": meta.server_uid,
                        ":size": meta.size,
                        ":content_type": meta.content_type,
                        ":id": meta.id,
                    },
                )?;

                let folders = folders::ancestors_and_self(
                    txn,
                    &[old.parent_folder_id, meta.parent_folder_id],
                )?;
                Ok((old, previous, folders))
            })?;

        meta.previous_parent_folder_id = previous;
        meta.data_modified = false;
        self.caches.put_header(meta);
        self.emit(ChangeType::Updated, EntityKind::Message, &[meta.id]);
        self.emit(ChangeType::ContentsModified, EntityKind::Folder, &folders);
        self.emit(
            ChangeType::ContentsModified,
            EntityKind::Account,
            &distinct_valid(vec![
                old.parent_account_id,
                meta.parent_account_id,
            ]),
        );
        Ok(old)
    }

    fn finish_bulk_update(&mut self, update: BulkUpdate) {
        self.caches.evict_headers(&update.messages);
        self.emit(ChangeType::Updated, EntityKind::Message, &update.messages);
        self.emit(
            ChangeType::ContentsModified,
            EntityKind::Folder,
            &update.folders,
        );
        self.emit(
            ChangeType::ContentsModified,
            EntityKind::Account,
            &update.accounts,
        );
    }
}

impl MessageProperties {
    /// Returns a copy of `meta` holding only the selected fields.
    fn project(self, meta: MessageMetaData) -> MessageMetaData {
        let mut out = MessageMetaData {
            timestamp: DateTime::<Utc>::from(UNIX_EPOCH),
            data_modified: false,
            ..MessageMetaData::default()
        };

        if self.contains(Self::ID) {
            out.id = meta.id;
        }
        if self.contains(Self::TYPE) {
            out.message_type = meta.message_type;
        }
        if self.contains(Self::PARENT_FOLDER_ID) {
            out.parent_folder_id = meta.parent_folder_id;
        }
        if self.contains(Self::PREVIOUS_PARENT_FOLDER_ID) {
            out.previous_parent_folder_id = meta.previous_parent_folder_id;
        }
        if self.contains(Self::PARENT_ACCOUNT_ID) {
            out.parent_account_id = meta.parent_account_id;
        }
        if self.contains(Self::SENDER) {
            out.sender = meta.sender;
        }
        if self.contains(Self::RECIPIENTS) {
            out.recipients = meta.recipients;
        }
        if self.contains(Self::SUBJECT) {
            out.subject = meta.subject;
        }
        if self.contains(Self::TIMESTAMP) {
            out.timestamp = meta.timestamp;
        }
        if self.contains(Self::STATUS) {
            out.status = meta.status;
        }
        if self.contains(Self::FROM_MAILBOX) {
            out.from_mailbox = meta.from_mailbox;
        }
        if self.contains(Self::SERVER_UID) {
            out.server_uid = meta.server_uid;
        }
        if self.contains(Self::SIZE) {
            out.size = meta.size;
        }
        if self.contains(Self::CONTENT_TYPE) {
            out.content_type = meta.content_type;
        }
        if self.contains(Self::CONTENT_REF) {
            out.content_ref = meta.content_ref;
        }
        out
    }
}

/// Deletes the messages matching `condition`, which must not contain
/// placeholders, returning what they were.
pub(super) fn delete_where(
    txn: &rusqlite::Transaction<'_>,
    condition: &str,
    option: RemovalOption,
) -> Result<Vec<Doomed>, Error> {
    let doomed = txn
        .prepare(&format!(
            "SELECT `id`, `parent_folder_id`, `parent_account_id`, \
             `content_ref` FROM `messages` WHERE {condition} ORDER BY `id`",
        ))?
        .query_map((), from_row::<Doomed>)?
        .collect::<Result<Vec<_>, _>>()?;

    if RemovalOption::CreateRemovalRecord == option {
        txn.execute(
            &format!(
                "INSERT INTO `deleted_messages` \
                 (`parent_account_id`, `server_uid`, `from_mailbox`) \
                 SELECT `parent_account_id`, `server_uid`, `from_mailbox` \
                 FROM `messages` WHERE {condition} ORDER BY `id`",
            ),
            (),
        )?;
    }

    txn.execute(&format!("DELETE FROM `messages` WHERE {condition}"), ())?;
    Ok(doomed)
}

/// Selects the messages a bulk update applies to with `select`, then runs
/// `update` over the inline list of their ids.
///
/// `select` yields the id, the current folder, the folder the message ends up
/// in, and the account of each message.
fn bulk_update(
    txn: &rusqlite::Transaction<'_>,
    select: &str,
    clause: &WhereClause,
    update: impl FnOnce(&rusqlite::Transaction<'_>, &str) -> Result<(), Error>,
) -> Result<BulkUpdate, Error> {
    let touched = query_rows::<Touched>(txn, select, clause)?;
    if touched.is_empty() {
        return Ok(BulkUpdate::default());
    }

    let messages = touched.iter().map(|t| t.id).collect::<Vec<_>>();
    update(txn, &sql_list(&messages))?;

    let folders = folders::ancestors_and_self(
        txn,
        &touched.iter().flat_map(|t| t.folders).collect::<Vec<_>>(),
    )?;
    let accounts = distinct_valid(touched.iter().map(|t| t.account).collect());
    Ok(BulkUpdate {
        messages,
        folders,
        accounts,
    })
}

impl FromRow for Touched {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            folders: [row.get(1)?, row.get(2)?],
            account: row.get(3)?,
        })
    }
}

fn load_message(
    txn: &rusqlite::Transaction<'_>,
    id: MessageId,
) -> Result<MessageMetaData, Error> {
    txn.prepare_cached("SELECT * FROM `messages` WHERE `id` = ?")?
        .query_row((id,), from_row::<MessageMetaData>)
        .optional()?
        .ok_or(Error::NxMessage)
}

fn message_exists(
    txn: &rusqlite::Transaction<'_>,
    id: MessageId,
) -> Result<bool, Error> {
    txn.prepare_cached("SELECT 1 FROM `messages` WHERE `id` = ?")?
        .exists((id,))
        .map_err(Into::into)
}

fn check_parents(
    txn: &rusqlite::Transaction<'_>,
    meta: &MessageMetaData,
) -> Result<(), Error> {
    if !meta.parent_folder_id.is_valid() {
        return Err(Error::InvalidParentFolder);
    }
    if !folders::folder_exists(txn, meta.parent_folder_id)? {
        return Err(Error::NxFolder);
    }
    if !accounts::account_exists(txn, meta.parent_account_id)? {
        return Err(Error::NxAccount);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::super::test::*;
    use super::*;
    use crate::content::MemoryContentStore;
    use crate::key::{Comparator, MessageProperty, Order};
    use crate::model::{Account, AccountType, MessageType};
    use crate::notify::{ChangeEvent, MemoryHub, NullChannel};

    fn email(folder: FolderId, account: AccountId) -> Message {
        let mut meta =
            MessageMetaData::new(MessageType::Email, folder, account);
        meta.sender = "Alice <alice@example.com>".to_owned();
        meta.recipients = vec![
            "Bob <bob@example.com>".to_owned(),
            "carol@example.com".to_owned(),
        ];
        meta.subject = "Lunch".to_owned();
        meta.server_uid = "42".to_owned();
        meta.from_mailbox = "INBOX".to_owned();

        let mut message = Message::new(meta);
        message.set_body(MessageBody::text("text/plain", "Noon?"));
        message
    }

    #[test]
    fn add_and_get_with_body() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        let mut message = email(FolderId::INBOX, account);
        fixture.store.add_message(&mut message).unwrap();

        assert!(message.id().is_valid());
        assert!(!message.meta.data_modified);
        assert!(!message.is_content_modified());
        assert_eq!(5, message.meta.size);
        assert_eq!("text/plain", message.meta.content_type);
        assert_eq!(1, fixture.content.len());

        let fetched = fixture.store.message(message.id()).unwrap();
        assert_eq!(message, fetched);
        assert_eq!(
            message.meta,
            fixture.store.message_by_server_uid("42", account).unwrap(),
        );
        assert_matches!(
            Err(Error::NxMessage),
            fixture.store.message_by_server_uid("42", AccountId(999)),
        );

        assert_eq!(
            vec![
                event(ChangeType::Added, EntityKind::Account, &[account.0]),
                event(
                    ChangeType::Added,
                    EntityKind::Message,
                    &[message.id().0],
                ),
                event(
                    ChangeType::ContentsModified,
                    EntityKind::Folder,
                    &[FolderId::INBOX.0],
                ),
                event(
                    ChangeType::ContentsModified,
                    EntityKind::Account,
                    &[account.0],
                ),
            ],
            fixture.take_events(),
        );
    }

    #[test]
    fn add_validates_parents() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");

        assert_matches!(
            Err(Error::InvalidParentFolder),
            fixture
                .store
                .add_message(&mut email(FolderId::INVALID, account)),
        );
        assert_matches!(
            Err(Error::NxFolder),
            fixture.store.add_message(&mut email(FolderId(999), account)),
        );
        assert_matches!(
            Err(Error::NxAccount),
            fixture
                .store
                .add_message(&mut email(FolderId::INBOX, AccountId(999))),
        );
        // Bodies written for failed additions are cleaned up.
        assert_eq!(0, fixture.content.len());
    }

    #[test]
    fn update_requires_modification() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        let mut message = email(FolderId::INBOX, account);
        fixture.store.add_message(&mut message).unwrap();
        fixture.take_events();

        assert_matches!(
            Err(Error::NothingToUpdate),
            fixture.store.update_message(&mut message),
        );
        assert_matches!(
            Err(Error::NothingToUpdate),
            fixture.store.update_message_metadata(&mut message.meta),
        );
        assert!(fixture.take_events().is_empty());

        message.meta.set_status(4, true);
        fixture.store.update_message(&mut message).unwrap();
        assert_eq!(
            4,
            fixture.store.message_metadata(message.id()).unwrap().status,
        );
    }

    #[test]
    fn body_replacement_frees_old_blob() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        let mut message = email(FolderId::INBOX, account);
        fixture.store.add_message(&mut message).unwrap();
        let old_ref = message.meta.content_ref.clone();

        message.set_body(MessageBody::text("text/html", "<p>Noon?</p>"));
        fixture.store.update_message(&mut message).unwrap();

        assert_ne!(old_ref, message.meta.content_ref);
        assert_eq!(1, fixture.content.len());
        let fetched = fixture.store.message(message.id()).unwrap();
        assert_eq!("text/html", fetched.meta.content_type);
        assert_eq!(b"<p>Noon?</p>".to_vec(), fetched.body().parts[0].data);
    }

    #[test]
    fn moving_notifies_both_folders_and_ancestors() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        let work = fixture.folder("work", FolderId::ROOT, account);
        let project = fixture.folder("project", work, account);
        let id = fixture.message(FolderId::INBOX, account, "m");
        fixture.take_events();

        let mut meta = fixture.store.message_metadata(id).unwrap();
        meta.parent_folder_id = project;
        meta.data_modified = true;
        fixture.store.update_message_metadata(&mut meta).unwrap();

        assert_eq!(FolderId::INBOX, meta.previous_parent_folder_id);
        assert_eq!(
            vec![
                event(ChangeType::Updated, EntityKind::Message, &[id.0]),
                event(
                    ChangeType::ContentsModified,
                    EntityKind::Folder,
                    &[FolderId::INBOX.0, work.0, project.0],
                ),
                event(
                    ChangeType::ContentsModified,
                    EntityKind::Account,
                    &[account.0],
                ),
            ],
            fixture.take_events(),
        );

        let below_work = fixture
            .store
            .query_messages(
                &MessageKey::ancestor_folder_ids(work, Comparator::Includes),
                &MessageSortKey::new(),
            )
            .unwrap();
        assert_eq!(vec![id], below_work);
    }

    #[test]
    fn bulk_move_and_restore() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        let a = fixture.message(FolderId::INBOX, account, "a");
        let b = fixture.message(FolderId::INBOX, account, "b");
        let c = fixture.message(FolderId::SENT, account, "c");

        let in_inbox =
            MessageKey::parent_folder_id(FolderId::INBOX, Comparator::Equal);
        fixture.store.move_messages(&in_inbox, FolderId::TRASH).unwrap();
        let trash = fixture
            .store
            .query_messages(
                &Account {
                    id: account,
                    ..Account::new("", AccountType::Imap)
                }
                .trash_key(),
                &MessageSortKey::new(),
            )
            .unwrap();
        assert_eq!(vec![a, b], trash);
        assert_eq!(
            FolderId::INBOX,
            fixture
                .store
                .message_metadata(a)
                .unwrap()
                .previous_parent_folder_id,
        );

        fixture
            .store
            .restore_to_previous_folder(&MessageKey::ids([a, c]))
            .unwrap();
        let meta = fixture.store.message_metadata(a).unwrap();
        assert_eq!(FolderId::INBOX, meta.parent_folder_id);
        assert_eq!(FolderId::INVALID, meta.previous_parent_folder_id);
        assert_eq!(
            FolderId::SENT,
            fixture.store.message_metadata(c).unwrap().parent_folder_id,
        );
        assert_eq!(
            vec![FolderId::INBOX, FolderId::TRASH],
            fixture
                .store
                .message_folder_ids(&MessageKey::ids([a, b]))
                .unwrap(),
        );

        assert_matches!(
            Err(Error::NxFolder),
            fixture.store.move_messages(&in_inbox, FolderId(999)),
        );
    }

    #[test]
    fn bulk_status_update() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        let a = fixture.message(FolderId::INBOX, account, "a");
        let b = fixture.message(FolderId::INBOX, account, "b");
        let all = MessageKey::new();

        fixture.store.update_messages_status(&all, 0b101, true).unwrap();
        fixture
            .store
            .update_messages_status(&MessageKey::id(b), 0b001, false)
            .unwrap();

        assert_eq!(0b101, fixture.store.message_metadata(a).unwrap().status);
        assert_eq!(0b100, fixture.store.message_metadata(b).unwrap().status);
        assert_eq!(
            vec![a],
            fixture
                .store
                .query_messages(
                    &MessageKey::status(0b001, Comparator::Includes),
                    &MessageSortKey::new(),
                )
                .unwrap(),
        );
        assert_eq!(
            vec![b],
            fixture
                .store
                .query_messages(
                    &MessageKey::status(0b001, Comparator::Excludes),
                    &MessageSortKey::new(),
                )
                .unwrap(),
        );

        // High bits survive the trip through SQLite's signed integers.
        fixture
            .store
            .update_messages_status(&all, 1 << 63, true)
            .unwrap();
        assert_eq!(
            0b101 | 1 << 63,
            fixture.store.message_metadata(a).unwrap().status,
        );
    }

    #[test]
    fn remove_is_not_idempotent() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        let mut message = email(FolderId::INBOX, account);
        fixture.store.add_message(&mut message).unwrap();
        let id = message.id();
        fixture.take_events();

        fixture
            .store
            .remove_message(id, RemovalOption::CreateRemovalRecord)
            .unwrap();
        assert_eq!(
            vec![
                event(ChangeType::Removed, EntityKind::Message, &[id.0]),
                event(
                    ChangeType::ContentsModified,
                    EntityKind::Folder,
                    &[FolderId::INBOX.0],
                ),
                event(
                    ChangeType::Added,
                    EntityKind::RemovalRecord,
                    &[account.0],
                ),
                event(
                    ChangeType::ContentsModified,
                    EntityKind::Account,
                    &[account.0],
                ),
            ],
            fixture.take_events(),
        );
        assert_eq!(0, fixture.content.len());
        assert_matches!(Err(Error::NxMessage), fixture.store.message(id));

        assert_matches!(
            Err(Error::NothingToRemove),
            fixture
                .store
                .remove_message(id, RemovalOption::CreateRemovalRecord),
        );
        assert_eq!(Vec::<ChangeEvent>::new(), fixture.take_events());
        assert_eq!(
            1,
            fixture
                .store
                .message_removal_records(account, None)
                .unwrap()
                .len(),
        );
    }

    #[test]
    fn preload_window_saves_reads() {
        let hub = MemoryHub::new();
        let mut fixture = Fixture::with_hub(&hub);
        let account = fixture.account("alice");
        let ids = (0..12)
            .map(|i| fixture.message(FolderId::INBOX, account, &i.to_string()))
            .collect::<Vec<_>>();

        // A fresh handle has nothing cached.
        let mut peer = fixture.peer(&hub);
        let listed = peer
            .query_messages(
                &MessageKey::new(),
                &MessageSortKey::by(MessageProperty::Id, Order::Ascending),
            )
            .unwrap();
        assert_eq!(ids, listed);
        let reads = peer.stats().backend_reads;

        // Look-ahead defaults to 5, so the miss on #5 loads #1 to #10.
        peer.message_metadata(ids[5]).unwrap();
        assert_eq!(reads + 1, peer.stats().backend_reads);
        for &id in &ids[1..=10] {
            peer.message_metadata(id).unwrap();
        }
        assert_eq!(reads + 1, peer.stats().backend_reads);

        // Both neighbours of the ends are cached already.
        peer.message_metadata(ids[0]).unwrap();
        peer.message_metadata(ids[11]).unwrap();
        assert_eq!(reads + 3, peer.stats().backend_reads);
    }

    fn senders(store: &mut Store, option: ReturnOption) -> Vec<String> {
        store
            .query_messages_metadata(
                &MessageKey::new(),
                MessageProperties::SENDER,
                option,
            )
            .unwrap()
            .into_iter()
            .map(|m| {
                assert_eq!("", m.subject);
                assert_eq!(MessageId::INVALID, m.id);
                m.sender
            })
            .collect()
    }

    #[test]
    fn metadata_projection_and_distinct() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        for (subject, sender) in [
            ("a", "x@example.com"),
            ("b", "y@example.com"),
            ("c", "x@example.com"),
        ] {
            let mut meta = MessageMetaData::new(
                MessageType::Sms,
                FolderId::INBOX,
                account,
            );
            meta.subject = subject.to_owned();
            meta.sender = sender.to_owned();
            meta.size = 10;
            fixture.store.add_message_metadata(&mut meta).unwrap();
        }

        assert_eq!(
            vec!["x@example.com", "y@example.com", "x@example.com"],
            senders(&mut fixture.store, ReturnOption::NoDistinct),
        );
        assert_eq!(
            vec!["x@example.com", "y@example.com"],
            senders(&mut fixture.store, ReturnOption::ReturnDistinct),
        );

        let from_x = MessageKey::sender("x@example", Comparator::Equal);
        assert_eq!(2, fixture.store.count_messages(&from_x).unwrap());
        assert_eq!(20, fixture.store.size_of_messages(&from_x).unwrap());
        assert_eq!(
            0,
            fixture
                .store
                .size_of_messages(&MessageKey::nonmatching())
                .unwrap(),
        );
        assert_eq!(
            vec![account],
            fixture.store.message_account_ids(&from_x).unwrap(),
        );
    }

    #[test]
    fn distinct_keeps_first_occurrence_order() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        for i in 0..300 {
            let mut meta = MessageMetaData::new(
                MessageType::Email,
                FolderId::INBOX,
                account,
            );
            meta.sender = format!("user{}@example.com", (i * 3) % 7);
            fixture.store.add_message_metadata(&mut meta).unwrap();
        }

        assert_eq!(
            300,
            senders(&mut fixture.store, ReturnOption::NoDistinct).len(),
        );
        assert_eq!(
            [0, 3, 6, 2, 5, 1, 4]
                .iter()
                .map(|n| format!("user{n}@example.com"))
                .collect::<Vec<_>>(),
            senders(&mut fixture.store, ReturnOption::ReturnDistinct),
        );
    }

    #[test]
    fn query_ids_follow_sort_order() {
        let mut fixture = Fixture::new();
        let account = fixture.account("alice");
        let b = fixture.message(FolderId::INBOX, account, "b");
        let a = fixture.message(FolderId::INBOX, account, "a");
        let c = fixture.message(FolderId::INBOX, account, "c");

        assert_eq!(
            vec![a, b, c],
            fixture
                .store
                .query_messages(
                    &MessageKey::new(),
                    &MessageSortKey::by(
                        MessageProperty::Subject,
                        Order::Ascending,
                    ),
                )
                .unwrap(),
        );
    }

    #[test]
    fn add_fails_cleanly_when_store_stays_locked() {
        crate::init_test_log();
        let tmpdir = TempDir::new().unwrap();
        let mut config = StoreConfig::at(tmpdir.path());
        config.retry.min_delay_ms = 1;
        config.retry.max_delay_ms = 4;
        config.retry.max_attempts = 3;

        let content = Arc::new(MemoryContentStore::new());
        let mut store = Store::open_with(
            config.clone(),
            Box::new(Arc::clone(&content)),
            Box::new(NullChannel),
        )
        .unwrap();
        let mut account = Account::new("alice", AccountType::Imap);
        store.add_account(&mut account).unwrap();

        let mut locker = rusqlite::Connection::open(config.db_path()).unwrap();
        let lock = locker
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .unwrap();

        let mut message = email(FolderId::INBOX, account.id);
        assert_matches!(
            Err(Error::RetriesExhausted { attempts: 4, .. }),
            store.add_message(&mut message),
        );
        assert_eq!(3, store.stats().retries);
        assert!(!message.id().is_valid());
        assert!(message.meta.content_ref.is_none());
        assert_eq!(0, content.len());

        drop(lock);
        assert_eq!(0, store.count_messages(&MessageKey::new()).unwrap());
        store.add_message(&mut message).unwrap();
        assert_eq!(1, store.count_messages(&MessageKey::new()).unwrap());
    }
}
