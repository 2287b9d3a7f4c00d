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

//! A local message store.
//!
//! The store durably holds accounts, folders and messages in SQLite, answers
//! key/sort queries over them, keeps bounded caches of hot entities and
//! notifies other processes sharing the same store of every change.
//!
//! The entry point is `Store`. Everything it persists is exchanged as plain
//! value types from `model`, selected with the keys in `key`.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr $(,)*) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod content;
pub mod key;
pub mod model;
pub mod notify;
pub mod storage;
pub mod store;
pub mod support;

pub use crate::content::{ContentStore, FileContentStore, MemoryContentStore};
pub use crate::key::{
    AccountKey, AccountProperty, AccountSortKey, Comparator, FolderKey,
    FolderProperty, FolderSortKey, MessageKey, MessageProperty, MessageSortKey,
    Order,
};
pub use crate::model::*;
pub use crate::notify::{
    ChangeEvent, ChangeType, ChannelListener, EntityKind, Listener,
    NotificationChannel,
};
pub use crate::store::{
    MessageProperties, RemovalOption, ReturnOption, Store, StoreStats,
};
pub use crate::support::config::StoreConfig;
pub use crate::support::error::{Error, FailureKind};

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    INIT_TEST_LOG.call_once(|| {
        let stderr = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(Box::new(PatternEncoder::new(
                "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
            )))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stderr", Box::new(stderr)))
            .build(
                Root::builder()
                    .appender("stderr")
                    .build(log::LevelFilter::Debug),
            )
            .unwrap();
        log4rs::init_config(config).unwrap();
    })
}
