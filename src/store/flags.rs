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

use rusqlite::OptionalExtension as _;

use super::*;

/// Status bits available in each context.
const MAX_FLAGS: i64 = 64;

/// The namespace a status flag is registered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlagContext {
    Folder,
    Message,
}

impl FlagContext {
    pub fn as_str(self) -> &'static str {
        match self {
            FlagContext::Folder => "folder",
            FlagContext::Message => "message",
        }
    }
}

impl Store {
    /// Registers a folder status flag called `name`, returning its mask.
    ///
    /// Registering a name a second time returns the existing mask.
    pub fn register_folder_status_flag(
        &mut self,
        name: &str,
    ) -> Result<u64, Error> {
        self.register_status_flag(FlagContext::Folder, name)
    }

    /// Registers a message status flag called `name`, returning its mask.
    ///
    /// Registering a name a second time returns the existing mask.
    pub fn register_message_status_flag(
        &mut self,
        name: &str,
    ) -> Result<u64, Error> {
        self.register_status_flag(FlagContext::Message, name)
    }

    /// Returns the mask of the folder status flag `name`, or 0 if no such
    /// flag is registered.
    pub fn folder_status_mask(&mut self, name: &str) -> Result<u64, Error> {
        self.status_mask(FlagContext::Folder, name)
    }

    /// Returns the mask of the message status flag `name`, or 0 if no such
    /// flag is registered.
    pub fn message_status_mask(&mut self, name: &str) -> Result<u64, Error> {
        self.status_mask(FlagContext::Message, name)
    }

    fn register_status_flag(
        &mut self,
        context: FlagContext,
        name: &str,
    ) -> Result<u64, Error> {
        let bit = self.write("register_status_flag", |txn| {
            if let Some(bit) = load_bit(txn, context, name)? {
                return Ok(bit);
            }

            let max = txn
                .prepare_cached(
                    "SELECT COALESCE(MAX(`bit_index`), 0) \
                     FROM `status_flags` WHERE `context` = ?",
                )?
                .query_row((context.as_str(),), |row| row.get::<_, i64>(0))?;
            if max >= MAX_FLAGS {
                return Err(Error::StatusFlagsExhausted(context.as_str()));
            }

            txn.execute(
                "INSERT INTO `status_flags` (`name`, `context`, `bit_index`) \
                 VALUES (?, ?, ?)",
                (name, context.as_str(), max + 1),
            )?;
            Ok(max + 1)
        })?;

        let mask = mask_of(bit);
        self.flag_masks.insert((context, name.to_owned()), mask);
        Ok(mask)
    }

    fn status_mask(
        &mut self,
        context: FlagContext,
        name: &str,
    ) -> Result<u64, Error> {
        let memo_key = (context, name.to_owned());
        if let Some(&mask) = self.flag_masks.get(&memo_key) {
            return Ok(mask);
        }

        let bit = self.read("status_mask", |txn| load_bit(txn, context, name))?;
        // Unregistered names are not memoised; another handle may yet
        // register them.
        let mask = match bit {
            Some(bit) => mask_of(bit),
            None => return Ok(0),
        };
        self.flag_masks.insert(memo_key, mask);
        Ok(mask)
    }
}

fn load_bit(
    txn: &rusqlite::Transaction<'_>,
    context: FlagContext,
    name: &str,
) -> Result<Option<i64>, Error> {
    txn.prepare_cached(
        "SELECT `bit_index` FROM `status_flags` \
         WHERE `context` = ? AND `name` = ?",
    )?
    .query_row((context.as_str(), name), |row| row.get(0))
    .optional()
    .map_err(Into::into)
}

fn mask_of(bit: i64) -> u64 {
    1u64 << (bit - 1)
}
