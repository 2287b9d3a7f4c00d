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

use super::*;
use crate::model::MessageRemovalRecord;

/// Server UIDs per statement when purging removal records.
const PURGE_CHUNK: usize = 256;

impl Store {
    /// Returns the removal records of `account`, optionally only those of
    /// one server mailbox.
    pub fn message_removal_records(
        &mut self,
        account: AccountId,
        from_mailbox: Option<&str>,
    ) -> Result<Vec<MessageRemovalRecord>, Error> {
        self.read("message_removal_records", |txn| {
            let records = match from_mailbox {
                None => txn
                    .prepare_cached(
                        "SELECT * FROM `deleted_messages` \
                         WHERE `parent_account_id` = ? ORDER BY `id`",
                    )?
                    .query_map((account,), from_row::<MessageRemovalRecord>)?
                    .collect::<Result<Vec<_>, _>>()?,
                Some(mailbox) => txn
                    .prepare_cached(
                        "SELECT * FROM `deleted_messages` \
                         WHERE `parent_account_id` = ? \
                         AND `from_mailbox` = ? ORDER BY `id`",
                    )?
                    .query_map(
                        (account, mailbox),
                        from_row::<MessageRemovalRecord>,
                    )?
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(records)
        })
    }

    /// Deletes the removal records of `account` for the given server UIDs,
    /// or all of its records if `server_uids` is empty.
    pub fn purge_message_removal_records(
        &mut self,
        account: AccountId,
        server_uids: &[String],
    ) -> Result<(), Error> {
        let purged = self.write("purge_message_removal_records", |txn| {
            if server_uids.is_empty() {
                return txn
                    .execute(
                        "DELETE FROM `deleted_messages` \
                         WHERE `parent_account_id` = ?",
                        (account,),
                    )
                    .map_err(Into::into);
            }

            let mut purged = 0;
            for chunk in server_uids.chunks(PURGE_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "DELETE FROM `deleted_messages` \
                     WHERE `parent_account_id` = {} \
                     AND `server_uid` IN ({placeholders})",
                    account.0,
                );
                purged +=
                    txn.execute(&sql, rusqlite::params_from_iter(chunk))?;
            }
            Ok(purged)
        })?;

        if purged > 0 {
            self.emit(
                ChangeType::Removed,
                EntityKind::RemovalRecord,
                &[account],
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::super::test::*;
    use super::*;
    use crate::key::{Comparator, MessageKey};
    use crate::model::{FolderId, MessageMetaData, MessageType};

    fn message(
        fixture: &mut Fixture,
        account: AccountId,
        uid: &str,
        mailbox: &str,
    ) {
        let mut meta =
            MessageMetaData::new(MessageType::Email, FolderId::INBOX, account);
        meta.server_uid = uid.to_owned();
        meta.from_mailbox = mailbox.to_owned();
        fixture.store.add_message_metadata(&mut meta).unwrap();
    }

    #[test]
    fn records_follow_removal() {
        let mut fixture = Fixture::new();
        let alice = fixture.account("alice");
        let bob = fixture.account("bob");
        message(&mut fixture, alice, "1", "INBOX");
        message(&mut fixture, alice, "2", "Archive");
        message(&mut fixture, alice, "3", "INBOX");
        message(&mut fixture, bob, "4", "INBOX");

        fixture
            .store
            .remove_messages(
                &MessageKey::server_uids(["1", "2", "4"]),
                RemovalOption::CreateRemovalRecord,
            )
            .unwrap();
        fixture
            .store
            .remove_messages(
                &MessageKey::server_uid("3", Comparator::Equal),
                RemovalOption::NoRemovalRecord,
            )
            .unwrap();

        assert_eq!(
            vec![
                MessageRemovalRecord {
                    parent_account_id: alice,
                    server_uid: "1".to_owned(),
                    from_mailbox: "INBOX".to_owned(),
                },
                MessageRemovalRecord {
                    parent_account_id: alice,
                    server_uid: "2".to_owned(),
                    from_mailbox: "Archive".to_owned(),
                },
            ],
            fixture.store.message_removal_records(alice, None).unwrap(),
        );
        assert_eq!(
            1,
            fixture
                .store
                .message_removal_records(alice, Some("Archive"))
                .unwrap()
                .len(),
        );
        assert_eq!(
            1,
            fixture.store.message_removal_records(bob, None).unwrap().len(),
        );
    }

    #[test]
    fn purge_selected_and_all() {
        let mut fixture = Fixture::new();
        let alice = fixture.account("alice");
        let bob = fixture.account("bob");
        for uid in ["1", "2", "3"] {
            message(&mut fixture, alice, uid, "INBOX");
        }
        message(&mut fixture, bob, "1", "INBOX");
        fixture
            .store
            .remove_messages(
                &MessageKey::new(),
                RemovalOption::CreateRemovalRecord,
            )
            .unwrap();
        fixture.take_events();

        fixture
            .store
            .purge_message_removal_records(alice, &["2".to_owned()])
            .unwrap();
        assert_eq!(
            vec!["1", "3"],
            fixture
                .store
                .message_removal_records(alice, None)
                .unwrap()
                .into_iter()
                .map(|r| r.server_uid)
                .collect::<Vec<_>>(),
        );
        assert_eq!(
            vec![event(
                ChangeType::Removed,
                EntityKind::RemovalRecord,
                &[alice.0],
            )],
            fixture.take_events(),
        );

        // Nothing matches, so nothing is said.
        fixture
            .store
            .purge_message_removal_records(alice, &["2".to_owned()])
            .unwrap();
        assert!(fixture.take_events().is_empty());

        fixture.store.purge_message_removal_records(alice, &[]).unwrap();
        assert!(fixture
            .store
            .message_removal_records(alice, None)
            .unwrap()
            .is_empty());
        assert_eq!(
            1,
            fixture.store.message_removal_records(bob, None).unwrap().len(),
        );
    }
}
