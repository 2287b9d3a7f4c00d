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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No such account")]
    NxAccount,
    #[error("No such folder")]
    NxFolder,
    #[error("No such message")]
    NxMessage,
    #[error("Entity already exists; use update instead of add")]
    AlreadyExists,
    #[error("Neither message data nor content is modified")]
    NothingToUpdate,
    #[error("Nothing matched the removal key")]
    NothingToRemove,
    #[error("Standard folders cannot be removed or renamed")]
    StandardFolder,
    #[error("Folder cannot be its own parent")]
    FolderIsOwnParent,
    #[error("Account type is fixed once messages reference the account")]
    AccountTypeLocked,
    #[error("Message requires a valid parent folder")]
    InvalidParentFolder,
    #[error("Key has {0} comparators, more than the limit of {1}")]
    TooManyComparators(usize, usize),
    #[error("Key cannot be used here: {0}")]
    InvalidKey(&'static str),
    #[error("All 64 {0} status flags are already registered")]
    StatusFlagsExhausted(&'static str),
    #[error("Malformed identifier")]
    InvalidId,
    #[error("Unsupported encoding version {0}")]
    UnsupportedVersion(u32),
    #[error("Stored message content is corrupt")]
    CorruptContent,
    #[error("Gave up on {what} after {attempts} attempts")]
    RetriesExhausted { what: &'static str, attempts: u32 },
    #[error("Notifications to {0} peers are still undelivered")]
    UndeliveredNotifications(usize),
    #[error("Commit failed: {0}")]
    Commit(#[source] rusqlite::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// The broad classification of an `Error`, which determines how the retry
/// wrapper reacts to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The caller violated a precondition. Never retried.
    Logical,
    /// The backend is contended. Retried with backoff.
    Transient,
    /// Anything else the backend or the file system reported. Never retried.
    Fatal,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match *self {
            Error::NxAccount
            | Error::NxFolder
            | Error::NxMessage
            | Error::AlreadyExists
            | Error::NothingToUpdate
            | Error::NothingToRemove
            | Error::StandardFolder
            | Error::FolderIsOwnParent
            | Error::AccountTypeLocked
            | Error::InvalidParentFolder
            | Error::TooManyComparators(..)
            | Error::InvalidKey(..)
            | Error::StatusFlagsExhausted(..)
            | Error::InvalidId => FailureKind::Logical,

            Error::RetriesExhausted { .. }
            | Error::UndeliveredNotifications(..)
            | Error::Commit(..) => FailureKind::Transient,

            Error::Sqlite(ref e) if is_busy(e) => FailureKind::Transient,

            Error::UnsupportedVersion(..)
            | Error::CorruptContent
            | Error::Sqlite(..)
            | Error::Io(..)
            | Error::Cbor(..)
            | Error::Toml(..) => FailureKind::Fatal,
        }
    }
}

/// Returns whether `e` is SQLite reporting that another connection holds a
/// conflicting lock.
pub fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        *e,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        )
    }

    #[test]
    fn classification() {
        assert_eq!(FailureKind::Logical, Error::NxFolder.kind());
        assert_eq!(FailureKind::Transient, Error::Sqlite(busy()).kind());
        assert_eq!(
            FailureKind::Fatal,
            Error::Sqlite(rusqlite::Error::InvalidQuery).kind(),
        );
        assert_eq!(
            FailureKind::Transient,
            Error::Commit(rusqlite::Error::InvalidQuery).kind(),
        );
        assert_eq!(
            FailureKind::Transient,
            Error::UndeliveredNotifications(1).kind(),
        );
    }
}
