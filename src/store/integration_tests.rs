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

//! Full-stack tests running against a real store directory, with the file
//! content store and the UNIX socket notification channel, through the
//! public API only.

use std::time::Duration;

use tempfile::TempDir;

use crate::key::{
    Comparator, FolderKey, FolderSortKey, MessageKey, MessageSortKey,
};
use crate::model::*;
use crate::notify::{ChangeEvent, ChangeType, ChannelListener, EntityKind};
use crate::store::{RemovalOption, Store};
use crate::support::config::StoreConfig;
use crate::support::error::Error;

fn open(tmpdir: &TempDir) -> Store {
    crate::init_test_log();
    Store::open(StoreConfig::at(tmpdir.path().join("store"))).unwrap()
}

#[test]
fn message_lifecycle_leaves_removal_record() {
    let tmpdir = TempDir::new().unwrap();
    let mut store = open(&tmpdir);

    let mut account = Account::new("alice", AccountType::Imap);
    store.add_account(&mut account).unwrap();
    let mut inbox = Folder::new("Inbox", FolderId::ROOT, account.id);
    store.add_folder(&mut inbox).unwrap();

    let mut meta =
        MessageMetaData::new(MessageType::Email, inbox.id, account.id);
    meta.subject = "Hello".to_owned();
    meta.server_uid = "1234".to_owned();
    meta.from_mailbox = "INBOX".to_owned();
    let mut message = Message::new(meta);
    message.set_body(MessageBody::text("text/plain", "Hi there"));
    store.add_message(&mut message).unwrap();

    assert_eq!(
        vec![message.id()],
        store
            .query_messages(
                &MessageKey::parent_folder_id(inbox.id, Comparator::Equal),
                &MessageSortKey::new(),
            )
            .unwrap(),
    );

    store
        .remove_message(message.id(), RemovalOption::CreateRemovalRecord)
        .unwrap();
    let records = store.message_removal_records(account.id, None).unwrap();
    assert_eq!(1, records.len());
    assert_eq!("1234", records[0].server_uid);
    assert_eq!("INBOX", records[0].from_mailbox);
    assert_eq!(account.id, records[0].parent_account_id);
}

#[test]
fn data_survives_reopening() {
    let tmpdir = TempDir::new().unwrap();
    let (account, id) = {
        let mut store = open(&tmpdir);
        let mut account = Account::new("bob", AccountType::Pop);
        store.add_account(&mut account).unwrap();

        let mut message = Message::new(MessageMetaData::new(
            MessageType::Email,
            FolderId::INBOX,
            account.id,
        ));
        message.set_body(MessageBody::text("text/plain", "persistent"));
        store.add_message(&mut message).unwrap();
        store.register_message_status_flag("seen").unwrap();
        (account, message.id())
    };

    let mut store = open(&tmpdir);
    assert_eq!(account, store.account(account.id).unwrap());
    let message = store.message(id).unwrap();
    assert_eq!(b"persistent", &message.body().parts[0].data[..]);
    assert_eq!("text/plain", message.meta.content_type);
    assert_eq!(1, store.message_status_mask("seen").unwrap());
}

#[test]
fn changes_reach_other_handles() {
    let tmpdir = TempDir::new().unwrap();
    let mut writer = open(&tmpdir);
    let mut reader = open(&tmpdir);

    let mut account = Account::new("carol", AccountType::Imap);
    writer.add_account(&mut account).unwrap();
    let mut meta =
        MessageMetaData::new(MessageType::Email, FolderId::INBOX, account.id);
    meta.subject = "old".to_owned();
    writer.add_message_metadata(&mut meta).unwrap();
    writer.flush_notifications().unwrap();
    assert!(reader
        .wait_for_notifications(Duration::from_secs(5))
        .unwrap());
    reader.process_notifications().unwrap();

    // Warm the reader's cache, then change the message behind its back.
    assert_eq!("old", reader.message_metadata(meta.id).unwrap().subject);
    meta.subject = "new".to_owned();
    meta.data_modified = true;
    writer.update_message_metadata(&mut meta).unwrap();
    writer.flush_notifications().unwrap();

    assert!(reader
        .wait_for_notifications(Duration::from_secs(5))
        .unwrap());
    assert!(reader.process_notifications().unwrap() > 0);
    assert_eq!("new", reader.message_metadata(meta.id).unwrap().subject);

    writer
        .remove_message(meta.id, RemovalOption::NoRemovalRecord)
        .unwrap();
    writer.flush_notifications().unwrap();
    assert!(reader
        .wait_for_notifications(Duration::from_secs(5))
        .unwrap());
    reader.process_notifications().unwrap();
    assert_matches!(
        Err(Error::NxMessage),
        reader.message_metadata(meta.id),
    );
}

/// Waits for and applies everything `writer` has flushed.
fn catch_up(writer: &mut Store, reader: &mut Store) {
    writer.flush_notifications().unwrap();
    assert!(reader
        .wait_for_notifications(Duration::from_secs(5))
        .unwrap());
    assert!(reader.process_notifications().unwrap() > 0);
}

#[test]
fn reparenting_reaches_other_handles() {
    let tmpdir = TempDir::new().unwrap();
    let mut writer = open(&tmpdir);
    let mut reader = open(&tmpdir);
    let (listener, events) = ChannelListener::new();
    reader.add_listener(listener);

    let mut account = Account::new("dave", AccountType::Imap);
    writer.add_account(&mut account).unwrap();
    let mut add = |name: &str, parent: FolderId| {
        let mut folder = Folder::new(name, parent, account.id);
        writer.add_folder(&mut folder).unwrap();
        folder.id
    };
    let work = add("work", FolderId::ROOT);
    let home = add("home", FolderId::ROOT);
    let projects = add("projects", work);
    let old = add("old", projects);
    catch_up(&mut writer, &mut reader);
    events.try_iter().for_each(drop);

    // Warm the reader's cache with the folder about to move.
    assert_eq!(work, reader.folder(projects).unwrap().parent_id);
    assert_eq!(
        vec![work, projects],
        reader.folder_ancestor_ids(&[old]).unwrap(),
    );

    let mut moved = writer.folder(projects).unwrap();
    moved.parent_id = home;
    writer.update_folder(&mut moved).unwrap();
    catch_up(&mut writer, &mut reader);

    assert_eq!(home, reader.folder(projects).unwrap().parent_id);
    assert_eq!(vec![home], reader.folder_ancestor_ids(&[projects]).unwrap());
    assert_eq!(
        vec![home, projects],
        reader.folder_ancestor_ids(&[old]).unwrap(),
    );
    assert_eq!(
        vec![projects, old],
        reader
            .query_folders(
                &FolderKey::ancestor_folder_ids(home, Comparator::Includes),
                &FolderSortKey::new(),
            )
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect::<Vec<_>>(),
    );
    assert!(reader
        .query_folders(
            &FolderKey::ancestor_folder_ids(work, Comparator::Includes),
            &FolderSortKey::new(),
        )
        .unwrap()
        .is_empty());

    let events = events.try_iter().collect::<Vec<_>>();
    assert!(events.iter().all(|e| e.foreign));
    assert!(events.contains(&ChangeEvent {
        change: ChangeType::Updated,
        kind: EntityKind::Folder,
        ids: vec![projects.0],
        foreign: true,
    }));
    assert!(events.contains(&ChangeEvent {
        change: ChangeType::ContentsModified,
        kind: EntityKind::Folder,
        ids: vec![work.0, home.0],
        foreign: true,
    }));
}

#[test]
fn account_config_is_visible_to_other_handles() {
    let tmpdir = TempDir::new().unwrap();
    let mut writer = open(&tmpdir);
    let mut reader = open(&tmpdir);

    let mut config = AccountConfig::new();
    config.set("pop.server", "pop.example.com");
    let mut account = Account::new("erin", AccountType::Pop);
    writer.add_account_with_config(&mut account, &config).unwrap();
    catch_up(&mut writer, &mut reader);
    assert_eq!(config, reader.account_config(account.id).unwrap());

    writer.remove_account(account.id).unwrap();
    catch_up(&mut writer, &mut reader);
    assert_matches!(
        Err(Error::NxAccount),
        reader.account_config(account.id),
    );
}
