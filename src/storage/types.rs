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

//! Bindings for our model types to `rusqlite`.

use chrono::prelude::*;
use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef,
};

use crate::model::*;

macro_rules! transparent_to_sql {
    ($t:ident) => {
        impl ToSql for $t {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }
    };
}

macro_rules! transparent_from_sql {
    ($t:ident) => {
        impl FromSql for $t {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                FromSql::column_result(value).map(Self)
            }
        }
    };
}

transparent_to_sql!(AccountId);
transparent_from_sql!(AccountId);
transparent_to_sql!(FolderId);
transparent_from_sql!(FolderId);
transparent_to_sql!(MessageId);
transparent_from_sql!(MessageId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(pub DateTime<Utc>);

impl UnixTimestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl ToSql for UnixTimestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.timestamp()))
    }
}

impl FromSql for UnixTimestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let inner = i64::column_result(value)?;
        Utc.timestamp_opt(inner, 0)
            .single()
            .ok_or(FromSqlError::OutOfRange(inner))
            .map(Self)
    }
}

/// A 64-bit status field, stored in SQLite's signed integer type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusBits(pub u64);

impl ToSql for StatusBits {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0 as i64))
    }
}

impl FromSql for StatusBits {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(|v| Self(v as u64))
    }
}

impl ToSql for AccountType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for AccountType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

impl ToSql for MessageType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.bit()))
    }
}

impl FromSql for MessageType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bit = i64::column_result(value)?;
        Self::from_bit(bit).ok_or(FromSqlError::OutOfRange(bit))
    }
}

/// Recipient lists are stored newline-separated, since display-form
/// addresses may themselves contain commas.
pub fn join_recipients(recipients: &[String]) -> String {
    recipients.join("\n")
}

pub fn split_recipients(s: &str) -> Vec<String> {
    s.split('\n')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

impl FromRow for Account {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            account_type: row.get("type")?,
            email_address: row.get("email_address")?,
        })
    }
}

impl FromRow for Folder {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            display_name: row.get("display_name")?,
            parent_id: row.get("parent_id")?,
            parent_account_id: row.get("parent_account_id")?,
            status: row.get::<_, StatusBits>("status")?.0,
        })
    }
}

impl FromRow for MessageMetaData {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            message_type: row.get("type")?,
            parent_folder_id: row.get("parent_folder_id")?,
            previous_parent_folder_id: row.get("previous_parent_folder_id")?,
            parent_account_id: row.get("parent_account_id")?,
            sender: row.get("sender")?,
            recipients: split_recipients(&row.get::<_, String>("recipients")?),
            subject: row.get("subject")?,
            timestamp: row.get::<_, UnixTimestamp>("timestamp")?.0,
            status: row.get::<_, StatusBits>("status")?.0,
            from_mailbox: row.get("from_mailbox")?,
            server_uid: row.get("server_uid")?,
            size: row.get("size")?,
            content_type: row.get("content_type")?,
            content_ref: row.get("content_ref")?,
            data_modified: false,
        })
    }
}

impl FromRow for MessageRemovalRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            parent_account_id: row.get("parent_account_id")?,
            server_uid: row.get("server_uid")?,
            from_mailbox: row.get("from_mailbox")?,
        })
    }
}

pub fn from_row<T: FromRow>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    T::from_row(row)
}

pub fn from_single<T: FromSql>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    row.get(0)
}

pub trait FromRow: Sized {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

macro_rules! from_row_tuple {
    ($($ix:tt: $t:ident),*) => {
        impl<$($t: FromSql,)*> FromRow
        for ($($t,)*) {
            fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
                Ok(($(row.get($ix)?,)*))
            }
        }
    }
}

from_row_tuple!(0: A);
from_row_tuple!(0: A, 1: B);
from_row_tuple!(0: A, 1: B, 2: C);
from_row_tuple!(0: A, 1: B, 2: C, 3: D);
from_row_tuple!(0: A, 1: B, 2: C, 3: D, 4: E);
