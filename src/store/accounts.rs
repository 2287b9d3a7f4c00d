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

use super::folders;
use super::messages::{self, Doomed};
use super::*;
use crate::key::{AccountKey, AccountSortKey};
use crate::model::{Account, AccountConfig};
use crate::storage::types::from_single;

impl Store {
    /// Adds `account` to the store, setting its id.
    pub fn add_account(&mut self, account: &mut Account) -> Result<(), Error> {
        self.add_account_with_config(account, &AccountConfig::new())
    }

    /// Adds `account` to the store together with its configuration, setting
    /// its id.
    pub fn add_account_with_config(
        &mut self,
        account: &mut Account,
        config: &AccountConfig,
    ) -> Result<(), Error> {
        let id = self.write("add_account", |txn| {
            if account.id.is_valid() && account_exists(txn, account.id)? {
                return Err(Error::AlreadyExists);
            }

            txn.execute(
                "INSERT INTO `accounts` (`type`, `name`, `email_address`) \
                 VALUES (?, ?, ?)",
                (account.account_type, &account.name, &account.email_address),
            )?;
            let id = AccountId(txn.last_insert_rowid());
            save_config(txn, id, config)?;
            Ok(id)
        })?;

        account.id = id;
        self.caches.put_account(account);
        self.emit(ChangeType::Added, EntityKind::Account, &[id]);
        Ok(())
    }

    /// Writes `account` back to the store, leaving its configuration as it
    /// is.
    ///
    /// The account type cannot change once messages refer to the account.
    pub fn update_account(
        &mut self,
        account: &mut Account,
    ) -> Result<(), Error> {
        self.update_account_impl(account, None)
    }

    /// Writes `account` back to the store and replaces its configuration
    /// with `config`.
    pub fn update_account_with_config(
        &mut self,
        account: &mut Account,
        config: &AccountConfig,
    ) -> Result<(), Error> {
        self.update_account_impl(account, Some(config))
    }

    /// Returns the configuration stored with account `id`.
    pub fn account_config(
        &mut self,
        id: AccountId,
    ) -> Result<AccountConfig, Error> {
        self.read("account_config", |txn| {
            if !account_exists(txn, id)? {
                return Err(Error::NxAccount);
            }

            txn.prepare_cached(
                "SELECT `name`, `value` FROM `account_config` \
                 WHERE `account_id` = ?",
            )?
            .query_map((id,), from_row::<(String, String)>)?
            .collect::<Result<AccountConfig, _>>()
            .map_err(Into::into)
        })
    }

    fn update_account_impl(
        &mut self,
        account: &mut Account,
        config: Option<&AccountConfig>,
    ) -> Result<(), Error> {
        self.write("update_account", |txn| {
            let old = load_account(txn, account.id)?;
            if old.account_type != account.account_type
                && txn
                    .prepare_cached(
                        "SELECT 1 FROM `messages` \
                         WHERE `parent_account_id` = ? LIMIT 1",
                    )?
                    .exists((account.id,))?
            {
                return Err(Error::AccountTypeLocked);
            }

            txn.execute(
                "UPDATE `accounts` \
                 SET `type` = ?, `name` = ?, `email_address` = ? \
                 WHERE `id` = ?",
                (
                    account.account_type,
                    &account.name,
                    &account.email_address,
                    account.id,
                ),
            )?;
            if let Some(config) = config {
                save_config(txn, account.id, config)?;
            }
            Ok(())
        })?;

        self.caches.put_account(account);
        self.emit(ChangeType::Updated, EntityKind::Account, &[account.id]);
        Ok(())
    }

    pub fn remove_account(&mut self, id: AccountId) -> Result<(), Error> {
        self.remove_accounts(&AccountKey::id(id))
    }

    /// Removes every account matching `key`, together with its folders,
    /// its messages and its removal records.
    ///
    /// No removal records are created for the messages deleted this way.
    pub fn remove_accounts(&mut self, key: &AccountKey) -> Result<(), Error> {
        let clause = self.where_clause(key)?;
        let removed = self.write("remove_accounts", |txn| {
            let accounts = query_rows::<(AccountId,)>(
                txn,
                &format!("SELECT `id` FROM `accounts` WHERE {}", clause.sql),
                &clause,
            )?
            .into_iter()
            .map(|(id,)| id)
            .collect::<Vec<_>>();
            if accounts.is_empty() {
                return Err(Error::NothingToRemove);
            }

            let list = sql_list(&accounts);
            let owned = txn
                .prepare(&format!(
                    "SELECT `id` FROM `folders` \
                     WHERE `parent_account_id` IN {list}",
                ))?
                .query_map((), from_single::<FolderId>)?
                .collect::<Result<Vec<_>, _>>()?;
            let folders = folders::descendants_and_self(txn, &owned)?;
            let folder_list = sql_list(&folders);

            let with_records = txn
                .prepare(&format!(
                    "SELECT DISTINCT `parent_account_id` \
                     FROM `deleted_messages` \
                     WHERE `parent_account_id` IN {list}",
                ))?
                .query_map((), from_single::<AccountId>)?
                .collect::<Result<Vec<_>, _>>()?;
            txn.execute(
                &format!(
                    "DELETE FROM `deleted_messages` \
                     WHERE `parent_account_id` IN {list}",
                ),
                (),
            )?;

            let doomed = messages::delete_where(
                txn,
                &format!(
                    "`parent_account_id` IN {list} \
                     OR `parent_folder_id` IN {folder_list}",
                ),
                RemovalOption::NoRemovalRecord,
            )?;

            txn.execute(
                &format!(
                    "DELETE FROM `folder_ancestor_links` \
                     WHERE `descendant_id` IN {folder_list} \
                     OR `ancestor_id` IN {folder_list}",
                ),
                (),
            )?;
            txn.execute(
                &format!("DELETE FROM `folders` WHERE `id` IN {folder_list}"),
                (),
            )?;
            txn.execute(
                &format!(
                    "DELETE FROM `account_config` \
                     WHERE `account_id` IN {list}",
                ),
                (),
            )?;
            txn.execute(
                &format!("DELETE FROM `accounts` WHERE `id` IN {list}"),
                (),
            )?;

            Ok(RemovedAccounts {
                accounts,
                folders,
                with_records: distinct_valid(with_records),
                messages: doomed,
            })
        })?;

        self.caches.evict_accounts(&removed.accounts);
        self.caches.evict_folders(&removed.folders);
        self.forget_messages(&removed.messages);

        let message_ids =
            removed.messages.iter().map(|m| m.id).collect::<Vec<_>>();
        self.emit(
            ChangeType::Removed,
            EntityKind::RemovalRecord,
            &removed.with_records,
        );
        self.emit(ChangeType::Removed, EntityKind::Message, &message_ids);
        self.emit(ChangeType::Removed, EntityKind::Folder, &removed.folders);
        self.emit(ChangeType::Removed, EntityKind::Account, &removed.accounts);
        Ok(())
    }

    pub fn account(&mut self, id: AccountId) -> Result<Account, Error> {
        if let Some(account) = self.caches.accounts.get(&id) {
            return Ok(account);
        }

        let account = self.read("account", |txn| load_account(txn, id))?;
        self.caches.put_account(&account);
        Ok(account)
    }

    pub fn query_accounts(
        &mut self,
        key: &AccountKey,
        sort: &AccountSortKey,
    ) -> Result<Vec<Account>, Error> {
        let clause = self.where_clause(key)?;
        let sql = format!(
            "SELECT * FROM `accounts` WHERE {} {}",
            clause.sql,
            sort.to_sql()?,
        );
        let accounts = self.read("query_accounts", |txn| {
            query_rows::<Account>(txn, &sql, &clause)
        })?;

        for account in &accounts {
            self.caches.put_account(account);
        }
        Ok(accounts)
    }

    pub fn count_accounts(&mut self, key: &AccountKey) -> Result<usize, Error> {
        let clause = self.where_clause(key)?;
        let sql =
            format!("SELECT COUNT(*) FROM `accounts` WHERE {}", clause.sql);
        self.read("count_accounts", |txn| {
            let count =
                txn.query_row(&sql, clause.params(), from_single::<i64>)?;
            Ok(count as usize)
        })
    }
}

struct RemovedAccounts {
    accounts: Vec<AccountId>,
    folders: Vec<FolderId>,
    with_records: Vec<AccountId>,
    messages: Vec<Doomed>,
}

fn load_account(
    txn: &rusqlite::Transaction<'_>,
    id: AccountId,
) -> Result<Account, Error> {
    txn.prepare_cached("SELECT * FROM `accounts` WHERE `id` = ?")?
        .query_row((id,), from_row::<Account>)
        .optional()?
        .ok_or(Error::NxAccount)
}

/// Replaces the stored configuration of account `id` with `config`.
fn save_config(
    txn: &rusqlite::Transaction<'_>,
    id: AccountId,
    config: &AccountConfig,
) -> Result<(), Error> {
    txn.prepare_cached("DELETE FROM `account_config` WHERE `account_id` = ?")?
        .execute((id,))?;
    let mut insert = txn.prepare_cached(
        "INSERT INTO `account_config` (`account_id`, `name`, `value`) \
         VALUES (?, ?, ?)",
    )?;
    for (name, value) in config.iter() {
        insert.execute((id, name, value))?;
    }
    Ok(())
}

pub(super) fn account_exists(
    txn: &rusqlite::Transaction<'_>,
    id: AccountId,
) -> Result<bool, Error> {
    txn.prepare_cached("SELECT 1 FROM `accounts` WHERE `id` = ?")?
        .exists((id,))
        .map_err(Into::into)
}

#[cfg(test)]
mod test {
    use super::super::test::*;
    use super::*;
    use crate::key::{
        AccountProperty, Comparator, MessageKey, MessageSortKey, Order,
    };
    use crate::model::AccountType;
    use crate::notify::ChangeEvent;

    #[test]
    fn add_query_get() {
        let mut fixture = Fixture::new();
        let mut alice = Account::new("alice", AccountType::Imap);
        alice.email_address = Some("Alice <alice@example.com>".to_owned());
        fixture.store.add_account(&mut alice).unwrap();
        assert!(alice.id.is_valid());

        let mut bob = Account::new("bob", AccountType::Pop);
        fixture.store.add_account(&mut bob).unwrap();

        assert_eq!(alice, fixture.store.account(alice.id).unwrap());
        assert_eq!(
            vec![bob.clone(), alice.clone()],
            fixture
                .store
                .query_accounts(
                    &AccountKey::new(),
                    &AccountSortKey::by(
                        AccountProperty::Name,
                        Order::Descending,
                    ),
                )
                .unwrap(),
        );
        assert_eq!(
            vec![alice.clone()],
            fixture
                .store
                .query_accounts(
                    &AccountKey::email_address(
                        "alice@example",
                        Comparator::Equal,
                    ),
                    &AccountSortKey::new(),
                )
                .unwrap(),
        );
        assert_eq!(
            1,
            fixture
                .store
                .count_accounts(&AccountKey::account_type(
                    AccountType::Pop,
                    Comparator::Equal,
                ))
                .unwrap(),
        );

        assert_matches!(
            Err(Error::AlreadyExists),
            fixture.store.add_account(&mut alice),
        );
        assert_matches!(
            Err(Error::NxAccount),
            fixture.store.account(AccountId(999)),
        );
    }

    #[test]
    fn cache_hits_skip_the_database() {
        let mut fixture = Fixture::new();
        let id = fixture.account("alice");

        let reads = fixture.store.stats().backend_reads;
        fixture.store.account(id).unwrap();
        fixture.store.account(id).unwrap();
        assert_eq!(reads, fixture.store.stats().backend_reads);
    }

    #[test]
    fn account_type_locked_by_messages() {
        let mut fixture = Fixture::new();
        let id = fixture.account("alice");
        let mut account = fixture.store.account(id).unwrap();

        account.account_type = AccountType::Pop;
        fixture.store.update_account(&mut account).unwrap();

        fixture.message(FolderId::INBOX, id, "hello");
        account.account_type = AccountType::Imap;
        assert_matches!(
            Err(Error::AccountTypeLocked),
            fixture.store.update_account(&mut account),
        );
        assert_eq!(
            AccountType::Pop,
            fixture.store.account(id).unwrap().account_type,
        );

        account.account_type = AccountType::Pop;
        account.name = "alicia".to_owned();
        fixture.store.update_account(&mut account).unwrap();
        assert_eq!("alicia", fixture.store.account(id).unwrap().name);
    }

    fn imap_config() -> AccountConfig {
        let mut config = AccountConfig::new();
        config.set("imap.server", "imap.example.com");
        config.set("imap.port", "993");
        config
    }

    #[test]
    fn config_is_saved_and_replaced() {
        let mut fixture = Fixture::new();
        let mut account = Account::new("alice", AccountType::Imap);
        fixture
            .store
            .add_account_with_config(&mut account, &imap_config())
            .unwrap();
        assert_eq!(
            imap_config(),
            fixture.store.account_config(account.id).unwrap(),
        );

        // A plain update leaves the configuration alone.
        account.name = "alicia".to_owned();
        fixture.store.update_account(&mut account).unwrap();
        assert_eq!(
            Some("993"),
            fixture.store.account_config(account.id).unwrap().get("imap.port"),
        );

        let mut config = imap_config();
        config.remove("imap.port");
        config.set("smtp.server", "smtp.example.com");
        fixture.take_events();
        fixture
            .store
            .update_account_with_config(&mut account, &config)
            .unwrap();
        assert_eq!(config, fixture.store.account_config(account.id).unwrap());
        assert_eq!(
            vec![event(
                ChangeType::Updated,
                EntityKind::Account,
                &[account.id.0],
            )],
            fixture.take_events(),
        );

        let plain = fixture.account("bob");
        assert!(fixture.store.account_config(plain).unwrap().is_empty());
    }

    #[test]
    fn config_of_unknown_account() {
        let mut fixture = Fixture::new();
        assert_matches!(
            Err(Error::NxAccount),
            fixture.store.account_config(AccountId(42)),
        );

        let mut ghost = Account::new("ghost", AccountType::Imap);
        ghost.id = AccountId(42);
        assert_matches!(
            Err(Error::NxAccount),
            fixture
                .store
                .update_account_with_config(&mut ghost, &imap_config()),
        );

        // Once the account exists, nothing of the failed update shows.
        let id = fixture.account("alice");
        assert!(fixture.store.account_config(id).unwrap().is_empty());
    }

    #[test]
    fn config_goes_with_account() {
        let mut fixture = Fixture::new();
        let mut alice = Account::new("alice", AccountType::Imap);
        fixture
            .store
            .add_account_with_config(&mut alice, &imap_config())
            .unwrap();
        let mut bob = Account::new("bob", AccountType::Imap);
        fixture
            .store
            .add_account_with_config(&mut bob, &imap_config())
            .unwrap();

        fixture.store.remove_account(alice.id).unwrap();
        assert_matches!(
            Err(Error::NxAccount),
            fixture.store.account_config(alice.id),
        );
        assert_eq!(
            imap_config(),
            fixture.store.account_config(bob.id).unwrap(),
        );
        assert_eq!(
            1,
            fixture.count(
                "SELECT COUNT(DISTINCT `account_id`) FROM `account_config`",
            ),
        );
    }

    #[test]
    fn remove_cascades() {
        let mut fixture = Fixture::new();
        let alice = fixture.account("alice");
        let bob = fixture.account("bob");
        let folder = fixture.folder("work", FolderId::ROOT, alice);
        let sub = fixture.folder("sub", folder, alice);
        let m1 = fixture.message(FolderId::INBOX, alice, "m1");
        let m2 = fixture.message(sub, alice, "m2");
        let kept = fixture.message(FolderId::INBOX, bob, "kept");
        fixture
            .store
            .remove_message(m1, RemovalOption::CreateRemovalRecord)
            .unwrap();
        fixture.take_events();

        fixture.store.remove_account(alice).unwrap();

        assert_eq!(
            vec![
                event(
                    ChangeType::Removed,
                    EntityKind::RemovalRecord,
                    &[alice.0],
                ),
                event(ChangeType::Removed, EntityKind::Message, &[m2.0]),
                event(
                    ChangeType::Removed,
                    EntityKind::Folder,
                    &[folder.0, sub.0],
                ),
                event(ChangeType::Removed, EntityKind::Account, &[alice.0]),
            ],
            fixture.take_events(),
        );

        assert_matches!(Err(Error::NxAccount), fixture.store.account(alice));
        assert_matches!(Err(Error::NxFolder), fixture.store.folder(sub));
        assert!(fixture
            .store
            .message_removal_records(alice, None)
            .unwrap()
            .is_empty());
        assert_eq!(
            vec![kept],
            fixture
                .store
                .query_messages(&MessageKey::new(), &MessageSortKey::new())
                .unwrap(),
        );

        assert_matches!(
            Err(Error::NothingToRemove),
            fixture.store.remove_account(alice),
        );
        assert_eq!(Vec::<ChangeEvent>::new(), fixture.take_events());
    }
}
