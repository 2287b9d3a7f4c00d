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
use crate::model::{AccountId, AccountType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountProperty {
    Id,
    Name,
    Type,
    EmailAddress,
}

impl Property for AccountProperty {
    type Id = AccountId;

    const ID: Self = Self::Id;
    const TABLE: &'static str = "accounts";

    fn column(self) -> &'static str {
        match self {
            Self::Id => "`id`",
            Self::Name => "`name`",
            Self::Type => "`type`",
            Self::EmailAddress => "IFNULL(`email_address`, '')",
        }
    }

    fn column_kind(self) -> ColumnKind {
        match self {
            Self::Id | Self::Type => ColumnKind::Integer,
            Self::Name => ColumnKind::Text,
            Self::EmailAddress => ColumnKind::Address,
        }
    }
}

impl AccountKey {
    pub fn name(name: &str, cmp: Comparator) -> Self {
        Self::leaf(AccountProperty::Name, cmp, [name.into()])
    }

    pub fn account_type(t: AccountType, cmp: Comparator) -> Self {
        Self::leaf(AccountProperty::Type, cmp, [t.code().into()])
    }

    pub fn email_address(address: &str, cmp: Comparator) -> Self {
        Self::leaf(AccountProperty::EmailAddress, cmp, [address.into()])
    }
}
