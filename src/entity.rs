//! Entity metamodel shared by the session and the query compiler.

use parking_lot::RwLock;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use std::fmt;
use std::sync::Arc;

use crate::persistence_context::{EntityEntries, PersistenceContext};

/// A managed entity instance.
///
/// Every lookup of the same identifier within one session hands out a clone of
/// the same `Arc`; use `Arc::ptr_eq` to check identity.
pub type Managed<E> = Arc<RwLock<E>>;

/// A column value, used for bind parameters and scalar query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i32),
    BigInt(i64),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// SQL type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    BigInt,
    Text,
}

/// The mapped entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Member,
    Team,
}

impl EntityKind {
    pub fn descriptor(self) -> &'static EntityDescriptor {
        match self {
            EntityKind::Member => &MEMBER,
            EntityKind::Team => &TEAM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// The owning entity holds the foreign key.
    ManyToOne,
    /// The target entity holds the foreign key back to the owner.
    OneToMany,
}

#[derive(Debug)]
pub struct Association {
    pub name: &'static str,
    pub kind: AssociationKind,
    pub target: EntityKind,
    pub foreign_key: &'static str,
}

#[derive(Debug)]
pub struct Column {
    pub name: &'static str,
    pub ty: FieldType,
    /// Query-language attribute name; `None` for foreign-key columns.
    pub field: Option<&'static str>,
}

/// Static mapping of one entity type to its table.
///
/// `columns[0]` is always the generated `id` column.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    pub name: &'static str,
    pub table: &'static str,
    pub columns: &'static [Column],
    pub associations: &'static [Association],
}

static MEMBER: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Member,
    name: "Member",
    table: "member",
    columns: &[
        Column { name: "id", ty: FieldType::BigInt, field: Some("id") },
        Column { name: "username", ty: FieldType::Text, field: Some("username") },
        Column { name: "age", ty: FieldType::Int, field: Some("age") },
        Column { name: "team_id", ty: FieldType::BigInt, field: None },
    ],
    associations: &[Association {
        name: "team",
        kind: AssociationKind::ManyToOne,
        target: EntityKind::Team,
        foreign_key: "team_id",
    }],
};

static TEAM: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Team,
    name: "Team",
    table: "team",
    columns: &[
        Column { name: "id", ty: FieldType::BigInt, field: Some("id") },
        Column { name: "name", ty: FieldType::Text, field: Some("name") },
    ],
    associations: &[Association {
        name: "members",
        kind: AssociationKind::OneToMany,
        target: EntityKind::Member,
        foreign_key: "team_id",
    }],
};

impl EntityDescriptor {
    /// Resolve an entity name as written in a query. Names are case-sensitive.
    pub fn by_name(name: &str) -> Option<&'static EntityDescriptor> {
        [&MEMBER, &TEAM].into_iter().find(|d| d.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&'static Column> {
        self.columns.iter().find(|c| c.field == Some(name))
    }

    pub fn association(&self, name: &str) -> Option<&'static Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// Comma-separated column list, qualified by `alias` when given.
    pub fn select_list(&self, alias: Option<&str>) -> String {
        self.columns
            .iter()
            .map(|c| match alias {
                Some(alias) => format!("{}.{}", alias, c.name),
                None => c.name.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn find_sql(&self) -> String {
        format!("SELECT {} FROM {} WHERE id = $1", self.select_list(None), self.table)
    }

    pub fn insert_sql(&self) -> String {
        let columns: Vec<&str> = self.columns[1..].iter().map(|c| c.name).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        )
    }

    pub fn update_sql(&self) -> String {
        let assignments: Vec<String> = self.columns[1..]
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", c.name, i + 1))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE id = ${}",
            self.table,
            assignments.join(", "),
            self.columns.len()
        )
    }

    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE id = $1", self.table)
    }
}

/// A type mapped to a table through an [`EntityDescriptor`].
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    fn descriptor() -> &'static EntityDescriptor {
        Self::KIND.descriptor()
    }

    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    /// Decode an instance from `row`, reading the descriptor's columns in
    /// order starting at column `offset`.
    fn from_row(row: &PgRow, offset: usize) -> Result<Self, sqlx::Error>;

    /// Values of every column except `id`, in descriptor order.
    fn column_values(&self) -> Vec<Value>;

    fn entries(ctx: &PersistenceContext) -> &EntityEntries<Self>;

    fn entries_mut(ctx: &mut PersistenceContext) -> &mut EntityEntries<Self>;
}

/// Decode an entity whose columns may all be null (outer joins).
pub(crate) fn decode_optional<E: Entity>(row: &PgRow, offset: usize) -> Result<Option<E>, sqlx::Error> {
    let id: Option<i64> = row.try_get(offset)?;
    match id {
        Some(_) => E::from_row(row, offset).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn decode_value(row: &PgRow, index: usize, ty: FieldType) -> Result<Value, sqlx::Error> {
    let value = match ty {
        FieldType::Int => row.try_get::<Option<i32>, _>(index)?.map(Value::Int),
        FieldType::BigInt => row.try_get::<Option<i64>, _>(index)?.map(Value::BigInt),
        FieldType::Text => row.try_get::<Option<String>, _>(index)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Bind `values` in order. Nulls are sent as `BIGINT`, the type of the only
/// nullable mapped column.
pub(crate) fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    values: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            Value::Null => query.bind(None::<i64>),
            Value::Int(v) => query.bind(*v),
            Value::BigInt(v) => query.bind(*v),
            Value::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_statements() {
        let member = EntityKind::Member.descriptor();
        assert_eq!(
            member.insert_sql(),
            "INSERT INTO member (username, age, team_id) VALUES ($1, $2, $3) RETURNING id"
        );
        assert_eq!(
            member.update_sql(),
            "UPDATE member SET username = $1, age = $2, team_id = $3 WHERE id = $4"
        );
        assert_eq!(
            member.find_sql(),
            "SELECT id, username, age, team_id FROM member WHERE id = $1"
        );
        assert_eq!(EntityKind::Team.descriptor().delete_sql(), "DELETE FROM team WHERE id = $1");
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert!(EntityDescriptor::by_name("Member").is_some());
        assert!(EntityDescriptor::by_name("member").is_none());
        let team = EntityDescriptor::by_name("Team").unwrap();
        assert_eq!(team.association("members").unwrap().target, EntityKind::Member);
        assert!(team.field("members").is_none());
        assert!(EntityKind::Member.descriptor().field("team_id").is_none());
    }
}
