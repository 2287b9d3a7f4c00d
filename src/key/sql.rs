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

//! Rendering of keys and sort keys to SQL.
//!
//! Integer id lists are written inline as literals, so that a key selecting
//! thousands of ids is not bounded by SQLite's host parameter limit. All
//! other values are bound as parameters, in the order of appearance of their
//! placeholders.

use std::fmt::Write as _;

use rusqlite::types::Value as SqlValue;

use super::*;

/// An SQL condition together with the values of its placeholders.
#[derive(Clone, Debug, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl WhereClause {
    pub fn params(&self) -> rusqlite::ParamsFromIter<&[SqlValue]> {
        rusqlite::params_from_iter(&self.values[..])
    }
}

pub(super) fn where_clause<P: Property>(
    key: &Key<P>,
    max_comparators: usize,
) -> Result<WhereClause, Error> {
    let count = key.comparator_count();
    if count > max_comparators {
        return Err(Error::TooManyComparators(count, max_comparators));
    }

    let mut renderer = Renderer::default();
    renderer.key(key)?;
    Ok(WhereClause {
        sql: renderer.sql,
        values: renderer.values,
    })
}

pub(super) fn order_by<P: Property>(
    fields: &[(P, Order)],
) -> Result<String, Error> {
    let mut sql = "ORDER BY ".to_owned();
    for &(property, order) in fields {
        if ColumnKind::Ancestor == property.column_kind() {
            return Err(Error::InvalidKey("cannot sort by folder ancestry"));
        }

        let _ = write!(
            sql,
            "{} {}, ",
            property.column(),
            match order {
                Order::Ascending => "ASC",
                Order::Descending => "DESC",
            },
        );
    }

    if !fields.iter().any(|&(property, _)| property == P::ID) {
        let _ = write!(sql, "{} ASC", P::ID.column());
    } else {
        sql.truncate(sql.len() - 2);
    }

    Ok(sql)
}

#[derive(Default)]
struct Renderer {
    sql: String,
    values: Vec<SqlValue>,
}

impl Renderer {
    fn key<P: Property>(&mut self, key: &Key<P>) -> Result<(), Error> {
        match key.node() {
            None => {
                self.sql.push('1');
                Ok(())
            },
            Some(node) => self.node(node),
        }
    }

    fn node<P: Property>(&mut self, node: &Node<P>) -> Result<(), Error> {
        match *node {
            Node::Nothing => self.sql.push('0'),
            Node::Leaf {
                property,
                comparator,
                ref values,
            } => self.leaf(property, comparator, values)?,
            Node::And(ref nodes) => self.join(nodes, " AND ")?,
            Node::Or(ref nodes) => self.join(nodes, " OR ")?,
            Node::Not(ref inner) => {
                self.sql.push_str("NOT (");
                self.node(inner)?;
                self.sql.push(')');
            },
        }

        Ok(())
    }

    fn join<P: Property>(
        &mut self,
        nodes: &[Node<P>],
        op: &str,
    ) -> Result<(), Error> {
        self.sql.push('(');
        for (ix, node) in nodes.iter().enumerate() {
            if 0 != ix {
                self.sql.push_str(op);
            }
            self.node(node)?;
        }
        self.sql.push(')');
        Ok(())
    }

    fn leaf<P: Property>(
        &mut self,
        property: P,
        comparator: Comparator,
        values: &[Value],
    ) -> Result<(), Error> {
        if values.is_empty() {
            // Nothing is equal to any element of the empty set.
            self.sql.push(
                if Some(false) == comparator.is_positive_membership() {
                    '1'
                } else {
                    '0'
                },
            );
            return Ok(());
        }

        let column = property.column();
        match (property.column_kind(), comparator) {
            (
                ColumnKind::Bitmask,
                Comparator::Includes | Comparator::Excludes,
            ) => self.bitmask(column, comparator, values),

            (ColumnKind::Text, Comparator::Includes | Comparator::Excludes)
            | (
                ColumnKind::Address,
                Comparator::Equal
                | Comparator::NotEqual
                | Comparator::Includes
                | Comparator::Excludes,
            ) => self.substring(column, comparator, values),

            (ColumnKind::Folder, _) if has_subkeys(values) => {
                self.nested(column, comparator, values, FolderProperty::TABLE)
            },
            (ColumnKind::Account, _) if has_subkeys(values) => {
                self.nested(column, comparator, values, AccountProperty::TABLE)
            },

            (ColumnKind::Ancestor, _) => {
                self.ancestor(column, comparator, values)
            },

            _ => self.simple(column, comparator, values),
        }
    }

    fn simple(
        &mut self,
        column: &str,
        comparator: Comparator,
        values: &[Value],
    ) -> Result<(), Error> {
        if let Some(positive) = comparator.is_positive_membership() {
            if let [ref value] = *values {
                let _ = write!(
                    self.sql,
                    "{} {} ",
                    column,
                    if positive { "=" } else { "<>" },
                );
                return self.scalar(value);
            }

            let _ = write!(
                self.sql,
                "{} {}IN (",
                column,
                if positive { "" } else { "NOT " },
            );
            self.list(values)?;
            self.sql.push(')');
            return Ok(());
        }

        let op = match comparator {
            Comparator::LessThan => "<",
            Comparator::LessThanEqual => "<=",
            Comparator::GreaterThan => ">",
            Comparator::GreaterThanEqual => ">=",
            _ => unreachable!(),
        };

        self.sql.push('(');
        for (ix, value) in values.iter().enumerate() {
            if 0 != ix {
                self.sql.push_str(" OR ");
            }
            let _ = write!(self.sql, "{column} {op} ");
            self.scalar(value)?;
        }
        self.sql.push(')');
        Ok(())
    }

    fn bitmask(
        &mut self,
        column: &str,
        comparator: Comparator,
        values: &[Value],
    ) -> Result<(), Error> {
        let mut mask = 0i64;
        for value in values {
            let Value::Int(bits) = *value else {
                return Err(Error::InvalidKey("bitmask test needs integers"));
            };
            mask |= bits;
        }

        let _ = write!(
            self.sql,
            "({} & ?) {} 0",
            column,
            if Comparator::Includes == comparator {
                "<>"
            } else {
                "="
            },
        );
        self.values.push(SqlValue::Integer(mask));
        Ok(())
    }

    fn substring(
        &mut self,
        column: &str,
        comparator: Comparator,
        values: &[Value],
    ) -> Result<(), Error> {
        let positive = comparator.is_positive_membership().unwrap_or(true);
        if !positive {
            self.sql.push_str("NOT ");
        }

        self.sql.push('(');
        for (ix, value) in values.iter().enumerate() {
            if 0 != ix {
                self.sql.push_str(" OR ");
            }

            let needle = match *value {
                Value::Text(ref s) => s.clone(),
                Value::Int(i) => i.to_string(),
                Value::Folders(_) | Value::Accounts(_) => {
                    return Err(Error::InvalidKey("nested key on text"));
                },
            };

            let _ = write!(self.sql, "{column} LIKE ? ESCAPE '\\'");
            self.values
                .push(SqlValue::Text(format!("%{}%", escape_like(&needle))));
        }
        self.sql.push(')');
        Ok(())
    }

    fn nested(
        &mut self,
        column: &str,
        comparator: Comparator,
        values: &[Value],
        table: &str,
    ) -> Result<(), Error> {
        let Some(positive) = comparator.is_positive_membership() else {
            return Err(Error::InvalidKey("nested key needs a set comparator"));
        };

        let (subkeys, literals) =
            values.iter().partition::<Vec<&Value>, _>(|v| is_subkey(v));

        if !positive {
            self.sql.push_str("NOT ");
        }
        self.sql.push('(');
        for (ix, subkey) in subkeys.into_iter().enumerate() {
            if 0 != ix {
                self.sql.push_str(" OR ");
            }
            let _ = write!(
                self.sql,
                "{column} IN (SELECT `id` FROM `{table}` WHERE "
            );
            self.subkey(subkey)?;
            self.sql.push(')');
        }
        if !literals.is_empty() {
            let _ = write!(self.sql, " OR {column} IN (");
            self.list(literals)?;
            self.sql.push(')');
        }
        self.sql.push(')');
        Ok(())
    }

    fn ancestor(
        &mut self,
        column: &str,
        comparator: Comparator,
        values: &[Value],
    ) -> Result<(), Error> {
        let Some(positive) = comparator.is_positive_membership() else {
            return Err(Error::InvalidKey("ancestry needs a set comparator"));
        };

        let _ = write!(
            self.sql,
            "{} {}IN (SELECT `descendant_id` FROM `folder_ancestor_links` \
             WHERE ",
            column,
            if positive { "" } else { "NOT " },
        );

        let (subkeys, literals) =
            values.iter().partition::<Vec<&Value>, _>(|v| is_subkey(v));
        let mut first = true;
        for subkey in subkeys {
            if !std::mem::take(&mut first) {
                self.sql.push_str(" OR ");
            }
            self.sql.push_str(
                "`ancestor_id` IN (SELECT `id` FROM `folders` WHERE ",
            );
            self.subkey(subkey)?;
            self.sql.push(')');
        }
        if !literals.is_empty() {
            if !first {
                self.sql.push_str(" OR ");
            }
            self.sql.push_str("`ancestor_id` IN (");
            self.list(literals)?;
            self.sql.push(')');
        }
        self.sql.push(')');
        Ok(())
    }

    fn subkey(&mut self, value: &Value) -> Result<(), Error> {
        match *value {
            Value::Folders(ref key) => self.key(key),
            Value::Accounts(ref key) => self.key(key),
            Value::Int(_) | Value::Text(_) => unreachable!(),
        }
    }

    fn scalar(&mut self, value: &Value) -> Result<(), Error> {
        match *value {
            Value::Int(i) => self.values.push(SqlValue::Integer(i)),
            Value::Text(ref s) => self.values.push(SqlValue::Text(s.clone())),
            Value::Folders(_) | Value::Accounts(_) => {
                return Err(Error::InvalidKey("nested key on plain property"));
            },
        }

        self.sql.push('?');
        Ok(())
    }

    fn list<'a>(
        &mut self,
        values: impl IntoIterator<Item = &'a Value>,
    ) -> Result<(), Error> {
        for (ix, value) in values.into_iter().enumerate() {
            if 0 != ix {
                self.sql.push_str(", ");
            }

            if let Value::Int(i) = *value {
                let _ = write!(self.sql, "{i}");
            } else {
                self.scalar(value)?;
            }
        }

        Ok(())
    }
}

fn is_subkey(value: &Value) -> bool {
    matches!(*value, Value::Folders(_) | Value::Accounts(_))
}

fn has_subkeys(values: &[Value]) -> bool {
    values.iter().any(is_subkey)
}

fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::*;

    fn render(key: &MessageKey) -> (String, Vec<SqlValue>) {
        let clause = key.to_sql(100).unwrap();
        (clause.sql, clause.values)
    }

    #[test]
    fn distinguished_keys() {
        assert_eq!("1", render(&MessageKey::new()).0);
        assert_eq!("0", render(&MessageKey::nonmatching()).0);
        assert_eq!("NOT (`id` = ?)", render(&!MessageKey::id(MessageId(4))).0);
    }

    #[test]
    fn id_lists_are_inline() {
        let (sql, values) =
            render(&MessageKey::ids(vec![MessageId(1), MessageId(2)]));
        assert_eq!("`id` IN (1, 2)", sql);
        assert!(values.is_empty());

        let (sql, values) = render(&MessageKey::id(MessageId(9)));
        assert_eq!("`id` = ?", sql);
        assert_eq!(vec![SqlValue::Integer(9)], values);
    }

    #[test]
    fn combinators() {
        let (sql, values) = render(
            &(MessageKey::status(4, Comparator::Includes)
                & (MessageKey::subject("a%b", Comparator::Includes)
                    | MessageKey::size(10, Comparator::GreaterThan))),
        );
        assert_eq!(
            "((`status` & ?) <> 0 AND ((`subject` LIKE ? ESCAPE '\\') \
             OR (`size` > ?)))",
            sql,
        );
        assert_eq!(
            vec![
                SqlValue::Integer(4),
                SqlValue::Text("%a\\%b%".to_owned()),
                SqlValue::Integer(10),
            ],
            values,
        );
    }

    #[test]
    fn sender_equality_is_substring() {
        let (sql, _) = render(&MessageKey::sender("bob", Comparator::Equal));
        assert_eq!("(`sender` LIKE ? ESCAPE '\\')", sql);
        let (sql, _) = render(&MessageKey::sender("bob", Comparator::NotEqual));
        assert_eq!("NOT (`sender` LIKE ? ESCAPE '\\')", sql);
    }

    #[test]
    fn nested_keys() {
        let (sql, values) = render(&MessageKey::parent_folder_key(
            FolderKey::name("Work", Comparator::Equal),
            Comparator::Equal,
        ));
        assert_eq!(
            "(`parent_folder_id` IN \
             (SELECT `id` FROM `folders` WHERE `name` = ?))",
            sql,
        );
        assert_eq!(vec![SqlValue::Text("Work".to_owned())], values);
    }

    #[test]
    fn ancestry() {
        let (sql, _) = render(&MessageKey::ancestor_folder_ids(
            FolderId(7),
            Comparator::Includes,
        ));
        assert_eq!(
            "`parent_folder_id` IN (SELECT `descendant_id` FROM \
             `folder_ancestor_links` WHERE `ancestor_id` IN (7))",
            sql,
        );
    }

    #[test]
    fn comparator_ceiling() {
        let key = MessageKey::status(1, Comparator::Includes)
            & MessageKey::status(2, Comparator::Includes)
            & MessageKey::status(4, Comparator::Includes);
        assert_matches!(Err(Error::TooManyComparators(3, 2)), key.to_sql(2));
        assert!(key.to_sql(3).is_ok());
    }

    #[test]
    fn ancestry_is_not_sortable() {
        assert_matches!(
            Err(Error::InvalidKey(..)),
            MessageSortKey::by(
                MessageProperty::AncestorFolderIds,
                Order::Ascending,
            )
            .to_sql(),
        );
    }
}
