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

//! Composable predicates over the entities in the store.
//!
//! A `Key` is an immutable tree of comparisons combined with AND, OR and NOT.
//! It is rendered to an SQL `WHERE` clause by the `sql` module when the store
//! executes it.
//!
//! Two distinguished keys deserve mention. The *empty* key, from
//! `Key::new()`, matches everything, and is the identity of both `and` and
//! `or`: `k.or(Key::new())` is `k`, not the empty key. The *non-matching*
//! key, from `Key::nonmatching()` or an empty id list, matches nothing;
//! `and` with it yields the non-matching key, while `or` with it yields the
//! other operand.

use std::fmt;
use std::ops;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::support::error::Error;

mod account;
mod folder;
mod message;
pub mod sql;

pub use self::account::AccountProperty;
pub use self::folder::FolderProperty;
pub use self::message::MessageProperty;
pub use self::sql::WhereClause;

pub type AccountKey = Key<AccountProperty>;
pub type FolderKey = Key<FolderProperty>;
pub type MessageKey = Key<MessageProperty>;

pub type AccountSortKey = SortKey<AccountProperty>;
pub type FolderSortKey = SortKey<FolderProperty>;
pub type MessageSortKey = SortKey<MessageProperty>;

/// Version written at the front of every encoded key.
const KEY_CODEC_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    /// Bitmask test on status and type properties, substring test on text
    /// properties, and descendant test on ancestor properties.
    Includes,
    /// The negation of `Includes`.
    Excludes,
}

impl Comparator {
    /// Whether this comparator selects rows which are *in* the value set.
    fn is_positive_membership(self) -> Option<bool> {
        match self {
            Comparator::Equal | Comparator::Includes => Some(true),
            Comparator::NotEqual | Comparator::Excludes => Some(false),
            _ => None,
        }
    }
}

/// How the value of a property is stored, which determines how comparisons
/// against it are rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    /// A bit set, where `Includes` tests for any common bit.
    Bitmask,
    Text,
    /// An address list stored in display form; `Equal` is a substring match.
    Address,
    /// A folder id, which may also be compared against a nested `FolderKey`.
    Folder,
    /// An account id, which may also be compared against a nested
    /// `AccountKey`.
    Account,
    /// The column holds a folder id, and the property matches the ancestors
    /// of that folder.
    Ancestor,
}

/// The property set of one entity kind.
pub trait Property:
    Copy + fmt::Debug + PartialEq + Serialize + DeserializeOwned + 'static
{
    type Id: Copy + Into<i64>;

    /// The property holding the row id.
    const ID: Self;
    /// The table holding rows of this entity kind.
    const TABLE: &'static str;

    /// The SQL expression to compare against.
    fn column(self) -> &'static str;
    fn column_kind(self) -> ColumnKind;
}

/// A value a property is compared against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Text(String),
    Folders(Box<FolderKey>),
    Accounts(Box<AccountKey>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<FolderKey> for Value {
    fn from(v: FolderKey) -> Self {
        Value::Folders(Box::new(v))
    }
}

impl From<AccountKey> for Value {
    fn from(v: AccountKey) -> Self {
        Value::Accounts(Box::new(v))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Property")]
pub struct Key<P> {
    node: Option<Node<P>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Property")]
pub(crate) enum Node<P> {
    Leaf {
        property: P,
        comparator: Comparator,
        values: Vec<Value>,
    },
    And(Vec<Node<P>>),
    Or(Vec<Node<P>>),
    Not(Box<Node<P>>),
    Nothing,
}

impl<P: Property> Default for Key<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Property> Key<P> {
    /// Returns the empty key, which matches everything.
    pub fn new() -> Self {
        Self { node: None }
    }

    /// Returns the key which matches nothing.
    pub fn nonmatching() -> Self {
        Self {
            node: Some(Node::Nothing),
        }
    }

    /// Returns a key comparing `property` against `values`.
    ///
    /// With several values, `Equal` and `Includes` match if any value
    /// matches, and `NotEqual` and `Excludes` match if no value does.
    pub fn leaf(
        property: P,
        comparator: Comparator,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        Self {
            node: Some(Node::Leaf {
                property,
                comparator,
                values: values.into_iter().collect(),
            }),
        }
    }

    /// Returns a key matching exactly the rows whose id is in `ids`.
    ///
    /// An empty list yields the non-matching key.
    pub fn ids(ids: impl IntoIterator<Item = P::Id>) -> Self {
        let values = ids
            .into_iter()
            .map(|id| Value::Int(id.into()))
            .collect::<Vec<_>>();
        if values.is_empty() {
            Self::nonmatching()
        } else {
            Self::leaf(P::ID, Comparator::Equal, values)
        }
    }

    pub fn id(id: P::Id) -> Self {
        Self::ids(std::iter::once(id))
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    pub fn is_nonmatching(&self) -> bool {
        matches!(self.node, Some(Node::Nothing))
    }

    pub fn and(self, other: Self) -> Self {
        let (a, b) = match (self.node, other.node) {
            (None, b) => return Self { node: b },
            (a, None) => return Self { node: a },
            (Some(Node::Nothing), _) | (_, Some(Node::Nothing)) => {
                return Self::nonmatching();
            },
            (Some(a), Some(b)) => (a, b),
        };

        let mut terms = Vec::new();
        for node in [a, b] {
            match node {
                Node::And(inner) => terms.extend(inner),
                node => terms.push(node),
            }
        }

        Self {
            node: Some(Node::And(terms)),
        }
    }

    pub fn or(self, other: Self) -> Self {
        let (a, b) = match (self.node, other.node) {
            (None, b) => return Self { node: b },
            (a, None) => return Self { node: a },
            (Some(Node::Nothing), b) => return Self { node: b },
            (a, Some(Node::Nothing)) => return Self { node: a },
            (Some(a), Some(b)) => (a, b),
        };

        let mut terms = Vec::new();
        for node in [a, b] {
            match node {
                Node::Or(inner) => terms.extend(inner),
                node => terms.push(node),
            }
        }

        Self {
            node: Some(Node::Or(terms)),
        }
    }

    /// Returns the complement of this key.
    ///
    /// The complement of the empty key is the non-matching key and vice
    /// versa.
    pub fn negate(self) -> Self {
        match self.node {
            None => Self::nonmatching(),
            Some(Node::Nothing) => Self::new(),
            Some(Node::Not(inner)) => Self { node: Some(*inner) },
            Some(node) => Self {
                node: Some(Node::Not(Box::new(node))),
            },
        }
    }

    /// Counts the leaf comparisons in this key, including those of nested
    /// keys.
    pub fn comparator_count(&self) -> usize {
        self.node.as_ref().map_or(0, Node::comparator_count)
    }

    pub(crate) fn node(&self) -> Option<&Node<P>> {
        self.node.as_ref()
    }

    /// Renders this key as an SQL condition on `P::TABLE`.
    pub fn to_sql(&self, max_comparators: usize) -> Result<WhereClause, Error> {
        sql::where_clause(self, max_comparators)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        serde_cbor::to_vec(&Encoded {
            version: KEY_CODEC_VERSION,
            key: self,
        })
        .map_err(Into::into)
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let header = serde_cbor::from_slice::<EncodedHeader>(data)?;
        if KEY_CODEC_VERSION != header.version {
            return Err(Error::UnsupportedVersion(header.version));
        }

        let decoded = serde_cbor::from_slice::<Encoded<Self>>(data)?;
        Ok(decoded.key)
    }
}

impl<P: Property> Node<P> {
    fn comparator_count(&self) -> usize {
        match *self {
            Node::Leaf { ref values, .. } => {
                1 + values
                    .iter()
                    .map(|v| match *v {
                        Value::Folders(ref k) => k.comparator_count(),
                        Value::Accounts(ref k) => k.comparator_count(),
                        Value::Int(_) | Value::Text(_) => 0,
                    })
                    .sum::<usize>()
            },
            Node::And(ref nodes) | Node::Or(ref nodes) => {
                nodes.iter().map(Node::comparator_count).sum()
            },
            Node::Not(ref node) => node.comparator_count(),
            Node::Nothing => 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Encoded<T> {
    version: u32,
    key: T,
}

#[derive(Deserialize)]
struct EncodedHeader {
    version: u32,
}

impl<P: Property> ops::BitAnd for Key<P> {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.and(rhs)
    }
}

impl<P: Property> ops::BitOr for Key<P> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.or(rhs)
    }
}

impl<P: Property> ops::Not for Key<P> {
    type Output = Self;

    fn not(self) -> Self {
        self.negate()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    Ascending,
    Descending,
}

/// An ordering over rows of one entity kind.
///
/// Rows comparing equal under every listed property are ordered by id, so
/// the empty sort key yields insertion order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Property")]
pub struct SortKey<P> {
    fields: Vec<(P, Order)>,
}

impl<P: Property> Default for SortKey<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Property> SortKey<P> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn by(property: P, order: Order) -> Self {
        Self {
            fields: vec![(property, order)],
        }
    }

    /// Appends `other` as a secondary ordering.
    pub fn then(mut self, other: Self) -> Self {
        self.fields.extend(other.fields);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Renders the `ORDER BY` clause for this sort key.
    pub fn to_sql(&self) -> Result<String, Error> {
        sql::order_by(&self.fields)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;
    use crate::model::*;

    fn arb_leaf() -> impl Strategy<Value = MessageKey> {
        prop_oneof![
            (1i64..100).prop_map(|id| MessageKey::id(MessageId(id))),
            (1i64..100).prop_map(|id| MessageKey::parent_folder_id(
                FolderId(id),
                Comparator::Equal
            )),
            (0u64..64).prop_map(|bit| MessageKey::status(
                1 << bit,
                Comparator::Includes
            )),
            "[a-z]{0,4}".prop_map(|s| MessageKey::subject(
                &s,
                Comparator::Includes
            )),
            Just(MessageKey::nonmatching()),
            Just(MessageKey::new()),
        ]
    }

    fn arb_key() -> impl Strategy<Value = MessageKey> {
        arb_leaf().prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| a & b),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| a | b),
                inner.prop_map(|k| !k),
            ]
        })
    }

    proptest! {
        #[test]
        fn empty_is_identity(k in arb_key()) {
            prop_assert_eq!(k.clone(), k.clone() & MessageKey::new());
            prop_assert_eq!(k.clone(), MessageKey::new() & k.clone());
            prop_assert_eq!(k.clone(), k.clone() | MessageKey::new());
            prop_assert_eq!(k.clone(), MessageKey::new() | k);
        }

        #[test]
        fn nonmatching_absorbs_and(k in arb_key()) {
            prop_assert!((k.clone() & MessageKey::nonmatching())
                         .is_nonmatching());
            prop_assert!((MessageKey::nonmatching() & k).is_nonmatching());
        }

        #[test]
        fn nonmatching_loses_or(k in arb_key()) {
            prop_assume!(!k.is_empty());
            prop_assert_eq!(k.clone(), k.clone() | MessageKey::nonmatching());
            prop_assert_eq!(k.clone(), MessageKey::nonmatching() | k);
        }

        #[test]
        fn double_negation(k in arb_key()) {
            prop_assert_eq!(k.clone(), !!k);
        }

        #[test]
        fn codec_preserves_keys(k in arb_key()) {
            let encoded = k.encode().unwrap();
            prop_assert_eq!(k, MessageKey::decode(&encoded).unwrap());
        }
    }

    #[test]
    fn empty_key_is_the_identity_of_or() {
        assert!((MessageKey::new() | MessageKey::nonmatching())
            .is_nonmatching());
        assert!((MessageKey::nonmatching() | MessageKey::new())
            .is_nonmatching());
        assert!((MessageKey::new() | MessageKey::new()).is_empty());
        assert_eq!(
            MessageKey::id(MessageId(4)),
            MessageKey::new() | MessageKey::id(MessageId(4)),
        );
    }

    #[test]
    fn negation_of_distinguished_keys() {
        assert!((!MessageKey::new()).is_nonmatching());
        assert!((!MessageKey::nonmatching()).is_empty());
    }

    #[test]
    fn id_lists() {
        assert!(MessageKey::ids(Vec::<MessageId>::new()).is_nonmatching());
        assert_eq!(
            MessageKey::id(MessageId(3)),
            MessageKey::ids(vec![MessageId(3)]),
        );
        assert!(!MessageKey::id(MessageId(3)).is_empty());
    }

    #[test]
    fn comparator_count_includes_nested_keys() {
        let key = MessageKey::parent_folder_key(
            FolderKey::name("a", Comparator::Equal)
                | FolderKey::name("b", Comparator::Equal),
            Comparator::Equal,
        ) & MessageKey::status(1, Comparator::Includes);
        assert_eq!(4, key.comparator_count());
        assert_eq!(0, MessageKey::new().comparator_count());
        assert_eq!(0, MessageKey::nonmatching().comparator_count());
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let data = serde_cbor::to_vec(&Encoded {
            version: 99,
            key: MessageKey::new(),
        })
        .unwrap();
        assert_matches!(
            Err(Error::UnsupportedVersion(99)),
            MessageKey::decode(&data),
        );
        assert_matches!(Err(Error::Cbor(..)), MessageKey::decode(b"\xff"));
    }

    #[test]
    fn sort_keys_concatenate() {
        let sort =
            MessageSortKey::by(MessageProperty::TimeStamp, Order::Descending)
                .then(MessageSortKey::by(
                    MessageProperty::Subject,
                    Order::Ascending,
                ));
        assert_eq!(
            "ORDER BY `timestamp` DESC, `subject` ASC, `id` ASC",
            sort.to_sql().unwrap(),
        );
        assert_eq!(
            "ORDER BY `id` ASC",
            MessageSortKey::new().to_sql().unwrap(),
        );
    }
}
