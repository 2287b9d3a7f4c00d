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

//! Value types exchanged with the store.
//!
//! Nothing here holds a reference into the store. Callers read an entity,
//! change their copy and hand it back through the corresponding `update`
//! operation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use crate::key::{AccountKey, Comparator, MessageKey};
use crate::support::error::Error;

/// Version written at the front of encoded ids.
const ID_CODEC_VERSION: u32 = 1;

macro_rules! entity_id {
    ($t:ident, $prefix:expr) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $t(pub i64);

        impl $t {
            /// The unset id. Entities which have not been added yet carry
            /// this.
            pub const INVALID: Self = Self(0);

            pub fn is_valid(self) -> bool {
                0 != self.0
            }

            /// Returns the versioned text form, `v1:kind:n`, for ids kept
            /// outside the store. `Display` gives the bare `kind:n`.
            pub fn encode(self) -> String {
                format!("v{}:{}", ID_CODEC_VERSION, self)
            }

            /// Parses the output of `encode`.
            pub fn decode(s: &str) -> Result<Self, Error> {
                let (version, rest) = s
                    .strip_prefix('v')
                    .and_then(|s| s.split_once(':'))
                    .ok_or(Error::InvalidId)?;
                let version =
                    version.parse::<u32>().map_err(|_| Error::InvalidId)?;
                if ID_CODEC_VERSION != version {
                    return Err(Error::UnsupportedVersion(version));
                }
                rest.parse()
            }
        }

        impl From<$t> for i64 {
            fn from(id: $t) -> i64 {
                id.0
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }

        impl FromStr for $t {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                s.strip_prefix($prefix)
                    .and_then(|s| s.strip_prefix(':'))
                    .and_then(|s| s.parse::<i64>().ok())
                    .map(Self)
                    .ok_or(Error::InvalidId)
            }
        }
    };
}

entity_id!(AccountId, "account");
entity_id!(FolderId, "folder");
entity_id!(MessageId, "message");

impl FolderId {
    /// Parent id carried by top-level folders.
    pub const ROOT: Self = Self(0);
    pub const INBOX: Self = Self(1);
    pub const OUTBOX: Self = Self(2);
    pub const DRAFTS: Self = Self(3);
    pub const SENT: Self = Self(4);
    pub const TRASH: Self = Self(5);

    /// Whether this is one of the reserved folders created with the store.
    pub fn is_standard(self) -> bool {
        StandardFolder::from_id(self).is_some()
    }
}

/// The folders every store is created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StandardFolder {
    Inbox,
    Outbox,
    Drafts,
    Sent,
    Trash,
}

impl StandardFolder {
    pub const ALL: [Self; 5] = [
        Self::Inbox,
        Self::Outbox,
        Self::Drafts,
        Self::Sent,
        Self::Trash,
    ];

    pub fn id(self) -> FolderId {
        match self {
            Self::Inbox => FolderId::INBOX,
            Self::Outbox => FolderId::OUTBOX,
            Self::Drafts => FolderId::DRAFTS,
            Self::Sent => FolderId::SENT,
            Self::Trash => FolderId::TRASH,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Inbox => "Inbox",
            Self::Outbox => "Outbox",
            Self::Drafts => "Drafts",
            Self::Sent => "Sent",
            Self::Trash => "Trash",
        }
    }

    pub fn from_id(id: FolderId) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.id() == id)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
pub enum AccountType {
    Pop,
    Imap,
    Sms,
    Mms,
    /// Instant messaging and other collective services.
    Collective,
    System,
}

impl AccountType {
    pub(crate) fn code(self) -> i64 {
        match self {
            Self::Pop => 0,
            Self::Imap => 1,
            Self::Sms => 2,
            Self::Mms => 3,
            Self::Collective => 4,
            Self::System => 5,
        }
    }

    pub(crate) fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Pop,
            1 => Self::Imap,
            2 => Self::Sms,
            3 => Self::Mms,
            4 => Self::Collective,
            5 => Self::System,
            _ => return None,
        })
    }

    /// The type of message carried by accounts of this type.
    pub fn message_type(self) -> MessageType {
        match self {
            Self::Pop | Self::Imap => MessageType::Email,
            Self::Sms => MessageType::Sms,
            Self::Mms => MessageType::Mms,
            Self::Collective => MessageType::Instant,
            Self::System => MessageType::System,
        }
    }
}

/// The kind of a message.
///
/// Every type has its own bit, so a set of types can be matched at once with
/// `Comparator::Includes`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
pub enum MessageType {
    None,
    Mms,
    Sms,
    Email,
    Instant,
    System,
}

impl MessageType {
    pub fn bit(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Mms => 1 << 0,
            Self::Sms => 1 << 1,
            Self::Email => 1 << 2,
            Self::Instant => 1 << 3,
            Self::System => 1 << 4,
        }
    }

    pub(crate) fn from_bit(bit: i64) -> Option<Self> {
        Some(match bit {
            0 => Self::None,
            1 => Self::Mms,
            2 => Self::Sms,
            4 => Self::Email,
            8 => Self::Instant,
            16 => Self::System,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub account_type: AccountType,
    /// Mirrors the sending address configured for the account.
    pub email_address: Option<String>,
}

impl Account {
    pub fn new(name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            id: AccountId::INVALID,
            name: name.into(),
            account_type,
            email_address: None,
        }
    }

    /// A key selecting every message belonging to this account.
    pub fn messages_key(&self) -> MessageKey {
        MessageKey::parent_account_id(self.id, Comparator::Equal)
    }

    /// A key selecting the messages of this account lying in the trash.
    pub fn trash_key(&self) -> MessageKey {
        self.messages_key()
            & MessageKey::parent_folder_id(FolderId::TRASH, Comparator::Equal)
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::id(self.id)
    }
}

/// Named settings kept alongside an account, such as the server addresses
/// and credentials its mail services use.
///
/// The store treats names and values as opaque text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountConfig {
    values: BTreeMap<String, String>,
}

impl AccountConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the settings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for AccountConfig {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub display_name: Option<String>,
    /// `FolderId::ROOT` for top-level folders.
    pub parent_id: FolderId,
    /// `AccountId::INVALID` if the folder belongs to no particular account.
    pub parent_account_id: AccountId,
    pub status: u64,
}

impl Folder {
    pub fn new(
        name: impl Into<String>,
        parent_id: FolderId,
        parent_account_id: AccountId,
    ) -> Self {
        Self {
            id: FolderId::INVALID,
            name: name.into(),
            display_name: None,
            parent_id,
            parent_account_id,
            status: 0,
        }
    }

    /// The display name, falling back to the name if none is set.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Everything about a message except its body.
///
/// Timestamps are stored with one-second precision.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageMetaData {
    pub id: MessageId,
    pub message_type: MessageType,
    pub parent_folder_id: FolderId,
    pub previous_parent_folder_id: FolderId,
    pub parent_account_id: AccountId,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub status: u64,
    /// The mailbox on the external server the message comes from.
    pub from_mailbox: String,
    /// The identifier assigned by the external server.
    pub server_uid: String,
    pub size: u64,
    pub content_type: String,
    /// Reference of the body blob within the content store, if any.
    pub content_ref: Option<String>,
    /// Whether the metadata needs to be written by the next add or update.
    pub data_modified: bool,
}

impl Default for MessageMetaData {
    fn default() -> Self {
        Self {
            id: MessageId::INVALID,
            message_type: MessageType::None,
            parent_folder_id: FolderId::INVALID,
            previous_parent_folder_id: FolderId::INVALID,
            parent_account_id: AccountId::INVALID,
            sender: String::new(),
            recipients: Vec::new(),
            subject: String::new(),
            timestamp: truncate_to_seconds(Utc::now()),
            status: 0,
            from_mailbox: String::new(),
            server_uid: String::new(),
            size: 0,
            content_type: String::new(),
            content_ref: None,
            data_modified: true,
        }
    }
}

impl MessageMetaData {
    pub fn new(
        message_type: MessageType,
        parent_folder_id: FolderId,
        parent_account_id: AccountId,
    ) -> Self {
        Self {
            message_type,
            parent_folder_id,
            parent_account_id,
            ..Self::default()
        }
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = truncate_to_seconds(timestamp);
        self.data_modified = true;
    }

    pub fn set_status(&mut self, mask: u64, set: bool) {
        if set {
            self.status |= mask;
        } else {
            self.status &= !mask;
        }
        self.data_modified = true;
    }
}

fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0).single().unwrap_or(t)
}

/// One part of a message body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    pub content_type: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// A message body, which the store persists as an opaque blob.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub parts: Vec<MessagePart>,
}

impl MessageBody {
    pub fn text(
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            parts: vec![MessagePart {
                content_type: content_type.into(),
                data: data.into(),
            }],
        }
    }

    pub fn size(&self) -> u64 {
        self.parts.iter().map(|p| p.data.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// A message together with its body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub meta: MessageMetaData,
    body: MessageBody,
    content_modified: bool,
}

impl Message {
    pub fn new(meta: MessageMetaData) -> Self {
        Self {
            meta,
            body: MessageBody::default(),
            content_modified: true,
        }
    }

    pub(crate) fn from_parts(
        meta: MessageMetaData,
        body: MessageBody,
    ) -> Self {
        Self {
            meta,
            body,
            content_modified: false,
        }
    }

    pub fn id(&self) -> MessageId {
        self.meta.id
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Replaces the body, updating the size and content type to match.
    pub fn set_body(&mut self, body: MessageBody) {
        self.meta.size = body.size();
        if let Some(first) = body.parts.first() {
            if body.parts.len() == 1 {
                self.meta.content_type = first.content_type.clone();
            } else {
                self.meta.content_type = "multipart/mixed".to_owned();
            }
        }
        self.body = body;
        self.content_modified = true;
        self.meta.data_modified = true;
    }

    pub fn is_content_modified(&self) -> bool {
        self.content_modified
    }

    pub(crate) fn clear_modified(&mut self) {
        self.content_modified = false;
        self.meta.data_modified = false;
    }
}

/// A tombstone for a deleted message, retained so that a synchroniser can
/// delete the message on the external server too.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRemovalRecord {
    pub parent_account_id: AccountId,
    pub server_uid: String,
    pub from_mailbox: String,
}
