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

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::*;
use crate::model::{AccountId, FolderId, MessageId, MessageType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageProperty {
    Id,
    Type,
    ParentFolderId,
    PreviousParentFolderId,
    ParentAccountId,
    Sender,
    Recipients,
    Subject,
    TimeStamp,
    Status,
    FromMailbox,
    ServerUid,
    Size,
    ContentType,
    /// The folders which the message's parent folder lies under.
    AncestorFolderIds,
}

impl Property for MessageProperty {
    type Id = MessageId;

    const ID: Self = Self::Id;
    const TABLE: &'static str = "messages";

    fn column(self) -> &'static str {
        match self {
            Self::Id => "`id`",
            Self::Type => "`type`",
            Self::ParentFolderId | Self::AncestorFolderIds => {
                "`parent_folder_id`"
            },
            Self::PreviousParentFolderId => "`previous_parent_folder_id`",
            Self::ParentAccountId => "`parent_account_id`",
            Self::Sender => "`sender`",
            Self::Recipients => "`recipients`",
            Self::Subject => "`subject`",
            Self::TimeStamp => "`timestamp`",
            Self::Status => "`status`",
            Self::FromMailbox => "`from_mailbox`",
            Self::ServerUid => "`server_uid`",
            Self::Size => "`size`",
            Self::ContentType => "`content_type`",
        }
    }

    fn column_kind(self) -> ColumnKind {
        match self {
            Self::Id | Self::TimeStamp | Self::Size => ColumnKind::Integer,
            Self::Type | Self::Status => ColumnKind::Bitmask,
            Self::ParentFolderId | Self::PreviousParentFolderId => {
                ColumnKind::Folder
            },
            Self::ParentAccountId => ColumnKind::Account,
            Self::Sender | Self::Recipients => ColumnKind::Address,
            Self::Subject
            | Self::FromMailbox
            | Self::ServerUid
            | Self::ContentType => ColumnKind::Text,
            Self::AncestorFolderIds => ColumnKind::Ancestor,
        }
    }
}

impl MessageKey {
    pub fn message_type(t: MessageType, cmp: Comparator) -> Self {
        Self::message_types([t], cmp)
    }

    /// With `Includes`, matches messages of any of the given types.
    pub fn message_types(
        types: impl IntoIterator<Item = MessageType>,
        cmp: Comparator,
    ) -> Self {
        Self::leaf(
            MessageProperty::Type,
            cmp,
            types.into_iter().map(|t| Value::Int(t.bit())),
        )
    }

    pub fn parent_folder_id(id: FolderId, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::ParentFolderId, cmp, [id.0.into()])
    }

    pub fn parent_folder_key(key: FolderKey, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::ParentFolderId, cmp, [key.into()])
    }

    pub fn previous_parent_folder_id(id: FolderId, cmp: Comparator) -> Self {
        Self::leaf(
            MessageProperty::PreviousParentFolderId,
            cmp,
            [id.0.into()],
        )
    }

    pub fn parent_account_id(id: AccountId, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::ParentAccountId, cmp, [id.0.into()])
    }

    pub fn parent_account_key(key: AccountKey, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::ParentAccountId, cmp, [key.into()])
    }

    /// Matches messages lying anywhere beneath `id`.
    pub fn ancestor_folder_ids(id: FolderId, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::AncestorFolderIds, cmp, [id.0.into()])
    }

    pub fn ancestor_folder_key(key: FolderKey, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::AncestorFolderIds, cmp, [key.into()])
    }

    pub fn sender(sender: &str, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::Sender, cmp, [sender.into()])
    }

    pub fn recipients(recipient: &str, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::Recipients, cmp, [recipient.into()])
    }

    pub fn subject(subject: &str, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::Subject, cmp, [subject.into()])
    }

    pub fn timestamp(timestamp: DateTime<Utc>, cmp: Comparator) -> Self {
        Self::leaf(
            MessageProperty::TimeStamp,
            cmp,
            [timestamp.timestamp().into()],
        )
    }

    pub fn status(mask: u64, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::Status, cmp, [(mask as i64).into()])
    }

    pub fn from_mailbox(mailbox: &str, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::FromMailbox, cmp, [mailbox.into()])
    }

    pub fn server_uid(uid: &str, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::ServerUid, cmp, [uid.into()])
    }

    pub fn server_uids<'a>(uids: impl IntoIterator<Item = &'a str>) -> Self {
        let values = uids.into_iter().map(Value::from).collect::<Vec<_>>();
        if values.is_empty() {
            Self::nonmatching()
        } else {
            Self::leaf(MessageProperty::ServerUid, Comparator::Equal, values)
        }
    }

    pub fn size(size: u64, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::Size, cmp, [(size as i64).into()])
    }

    pub fn content_type(content_type: &str, cmp: Comparator) -> Self {
        Self::leaf(MessageProperty::ContentType, cmp, [content_type.into()])
    }
}
