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

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use super::{ChangeType, EntityKind};

/// Order in which pending changes are sent when the buffer is drained.
///
/// Additions go first, parents before children, so that a receiver never
/// hears of a message before its folder. Removals go children first.
/// Contents-modified events come last, and are dropped for entities that
/// are removed in the same batch.
const FLUSH_ORDER: &[(ChangeType, EntityKind)] = &[
    (ChangeType::Added, EntityKind::Account),
    (ChangeType::Added, EntityKind::Folder),
    (ChangeType::Added, EntityKind::Message),
    (ChangeType::Added, EntityKind::RemovalRecord),
    (ChangeType::Updated, EntityKind::Message),
    (ChangeType::Updated, EntityKind::Folder),
    (ChangeType::Updated, EntityKind::Account),
    (ChangeType::Removed, EntityKind::RemovalRecord),
    (ChangeType::Removed, EntityKind::Message),
    (ChangeType::Removed, EntityKind::Folder),
    (ChangeType::Removed, EntityKind::Account),
    (ChangeType::ContentsModified, EntityKind::Folder),
    (ChangeType::ContentsModified, EntityKind::Account),
];

/// Coalesces changes destined for other processes.
///
/// A change arriving after a quiet period of at least the coalescing window
/// is due for sending immediately. Changes arriving within the window of the
/// previous one are held until the window passes without further changes.
/// Repeated ids collapse into one.
pub struct NotificationBuffer {
    window: Duration,
    last_change: Option<Instant>,
    pending: BTreeMap<(ChangeType, EntityKind), BTreeSet<i64>>,
}

impl NotificationBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_change: None,
            pending: BTreeMap::new(),
        }
    }

    /// Records a change, returning whether the buffer should be drained
    /// right away.
    pub fn record(
        &mut self,
        change: ChangeType,
        kind: EntityKind,
        ids: impl IntoIterator<Item = i64>,
        now: Instant,
    ) -> bool {
        let quiet = self.is_quiet(now);
        self.last_change = Some(now);
        self.pending.entry((change, kind)).or_default().extend(ids);
        quiet
    }

    /// Whether there are pending changes whose window has passed.
    pub fn is_due(&self, now: Instant) -> bool {
        !self.pending.is_empty() && self.is_quiet(now)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn is_quiet(&self, now: Instant) -> bool {
        self.last_change.map_or(true, |last| {
            now.saturating_duration_since(last) >= self.window
        })
    }

    /// Takes every pending change, in flush order.
    pub fn drain(&mut self) -> Vec<(ChangeType, EntityKind, Vec<i64>)> {
        let mut pending = std::mem::take(&mut self.pending);
        let removed_folders = pending
            .get(&(ChangeType::Removed, EntityKind::Folder))
            .cloned()
            .unwrap_or_default();
        let removed_accounts = pending
            .get(&(ChangeType::Removed, EntityKind::Account))
            .cloned()
            .unwrap_or_default();

        let mut batches = Vec::new();
        for &(change, kind) in FLUSH_ORDER {
            let Some(ids) = pending.remove(&(change, kind)) else {
                continue;
            };

            let removed = match (change, kind) {
                (ChangeType::ContentsModified, EntityKind::Folder) => {
                    Some(&removed_folders)
                },
                (ChangeType::ContentsModified, EntityKind::Account) => {
                    Some(&removed_accounts)
                },
                _ => None,
            };

            let ids = ids
                .into_iter()
                .filter(|id| removed.map_or(true, |r| !r.contains(id)))
                .collect::<Vec<_>>();
            if !ids.is_empty() {
                batches.push((change, kind, ids));
            }
        }

        batches
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn quiet_change_is_sent_at_once() {
        let mut buffer = NotificationBuffer::new(WINDOW);
        let t0 = Instant::now();

        assert!(buffer.record(
            ChangeType::Added,
            EntityKind::Message,
            [1],
            t0,
        ));
        assert_eq!(
            vec![(ChangeType::Added, EntityKind::Message, vec![1])],
            buffer.drain(),
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn close_changes_are_coalesced() {
        let mut buffer = NotificationBuffer::new(WINDOW);
        let t0 = Instant::now();

        assert!(buffer.record(
            ChangeType::Updated,
            EntityKind::Message,
            [1],
            t0
        ));
        buffer.drain();

        let t1 = t0 + Duration::from_millis(10);
        assert!(!buffer.record(
            ChangeType::Updated,
            EntityKind::Message,
            [2, 3],
            t1,
        ));
        let t2 = t1 + Duration::from_millis(50);
        assert!(!buffer.record(
            ChangeType::Updated,
            EntityKind::Message,
            [3, 2, 4],
            t2,
        ));

        // The window restarts with every change.
        assert!(!buffer.is_due(t1 + WINDOW));
        assert!(buffer.is_due(t2 + WINDOW));
        assert_eq!(
            vec![(ChangeType::Updated, EntityKind::Message, vec![2, 3, 4])],
            buffer.drain(),
        );
        assert!(!buffer.is_due(t2 + WINDOW * 10));
    }

    #[test]
    fn drain_order() {
        let mut buffer = NotificationBuffer::new(WINDOW);
        let now = Instant::now();

        // Within the window of the first change, so nothing is due.
        buffer.last_change = Some(now);
        for &(change, kind, ids) in &[
            (ChangeType::ContentsModified, EntityKind::Account, &[1, 2][..]),
            (ChangeType::ContentsModified, EntityKind::Folder, &[7, 8][..]),
            (ChangeType::Removed, EntityKind::Account, &[2][..]),
            (ChangeType::Removed, EntityKind::Folder, &[8][..]),
            (ChangeType::Removed, EntityKind::Message, &[30][..]),
            (ChangeType::Updated, EntityKind::Folder, &[7][..]),
            (ChangeType::Added, EntityKind::Message, &[31][..]),
            (ChangeType::Added, EntityKind::Folder, &[9][..]),
        ] {
            assert!(!buffer.record(change, kind, ids.iter().copied(), now));
        }

        assert_eq!(
            vec![
                (ChangeType::Added, EntityKind::Folder, vec![9]),
                (ChangeType::Added, EntityKind::Message, vec![31]),
                (ChangeType::Updated, EntityKind::Folder, vec![7]),
                (ChangeType::Removed, EntityKind::Message, vec![30]),
                (ChangeType::Removed, EntityKind::Folder, vec![8]),
                (ChangeType::Removed, EntityKind::Account, vec![2]),
                (ChangeType::ContentsModified, EntityKind::Folder, vec![7]),
                (ChangeType::ContentsModified, EntityKind::Account, vec![1]),
            ],
            buffer.drain(),
        );
    }
}
