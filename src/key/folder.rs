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

use serde::{Deserialize, Serialize};

use super::*;
use crate::model::{AccountId, FolderId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FolderProperty {
    Id,
    Name,
    ParentId,
    ParentAccountId,
    /// The display name, or the name if no display name is set.
    DisplayName,
    Status,
    AncestorFolderIds,
}

impl Property for FolderProperty {
    type Id = FolderId;

    const ID: Self = Self::Id;
    const TABLE: &'static str = "folders";

    fn column(self) -> &'static str {
        match self {
            Self::Id | Self::AncestorFolderIds => "`id`",
            Self::Name => "`name`",
            Self::ParentId => "`parent_id`",
            Self::ParentAccountId => "`parent_account_id`",
            Self::DisplayName => "COALESCE(`display_name`, `name`)",
            Self::Status => "`status`",
        }
    }

    fn column_kind(self) -> ColumnKind {
        match self {
            Self::Id => ColumnKind::Integer,
            Self::Name | Self::DisplayName => ColumnKind::Text,
            Self::ParentId => ColumnKind::Folder,
            Self::ParentAccountId => ColumnKind::Account,
            Self::Status => ColumnKind::Bitmask,
            Self::AncestorFolderIds => ColumnKind::Ancestor,
        }
    }
}

impl FolderKey {
    pub fn name(name: &str, cmp: Comparator) -> Self {
        Self::leaf(FolderProperty::Name, cmp, [name.into()])
    }

    pub fn display_name(name: &str, cmp: Comparator) -> Self {
        Self::leaf(FolderProperty::DisplayName, cmp, [name.into()])
    }

    pub fn parent_id(id: FolderId, cmp: Comparator) -> Self {
        Self::leaf(FolderProperty::ParentId, cmp, [id.0.into()])
    }

    pub fn parent_key(key: FolderKey, cmp: Comparator) -> Self {
        Self::leaf(FolderProperty::ParentId, cmp, [key.into()])
    }

    pub fn parent_account_id(id: AccountId, cmp: Comparator) -> Self {
        Self::leaf(FolderProperty::ParentAccountId, cmp, [id.0.into()])
    }

    pub fn parent_account_key(key: AccountKey, cmp: Comparator) -> Self {
        Self::leaf(FolderProperty::ParentAccountId, cmp, [key.into()])
    }

    pub fn status(mask: u64, cmp: Comparator) -> Self {
        Self::leaf(FolderProperty::Status, cmp, [(mask as i64).into()])
    }

    /// Matches folders lying anywhere beneath `id`.
    pub fn ancestor_folder_ids(id: FolderId, cmp: Comparator) -> Self {
        Self::leaf(FolderProperty::AncestorFolderIds, cmp, [id.0.into()])
    }

    pub fn ancestor_folder_key(key: FolderKey, cmp: Comparator) -> Self {
        Self::leaf(FolderProperty::AncestorFolderIds, cmp, [key.into()])
    }
}
