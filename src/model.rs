use sqlx::postgres::PgRow;
use sqlx::Row;
use std::fmt;

use crate::entity::{Entity, EntityKind, Value};
use crate::persistence_context::{EntityEntries, PersistenceContext};

/// A team member, optionally belonging to one [`Team`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: Option<i64>,
    pub username: String,
    pub age: i32,
    pub team_id: Option<i64>,
}

impl Member {
    pub fn new(username: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            username: username.into(),
            age,
            team_id: None,
        }
    }

    /// Point the member at `team` before it is persisted.
    pub fn with_team(mut self, team: &Team) -> Self {
        self.team_id = team.id;
        self
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Member{{id={}, username='{}', age={}}}",
            Value::from(self.id),
            self.username,
            self.age
        )
    }
}

impl Entity for Member {
    const KIND: EntityKind = EntityKind::Member;

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn from_row(row: &PgRow, offset: usize) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: Some(row.try_get(offset)?),
            username: row.try_get(offset + 1)?,
            age: row.try_get(offset + 2)?,
            team_id: row.try_get(offset + 3)?,
        })
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::from(self.username.as_str()),
            Value::from(self.age),
            Value::from(self.team_id),
        ]
    }

    fn entries(ctx: &PersistenceContext) -> &EntityEntries<Self> {
        &ctx.members
    }

    fn entries_mut(ctx: &mut PersistenceContext) -> &mut EntityEntries<Self> {
        &mut ctx.members
    }
}

/// A team. Its members are reached through the session, either lazily or by a
/// fetch join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Team{{id={}, name='{}'}}", Value::from(self.id), self.name)
    }
}

impl Entity for Team {
    const KIND: EntityKind = EntityKind::Team;

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn from_row(row: &PgRow, offset: usize) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: Some(row.try_get(offset)?),
            name: row.try_get(offset + 1)?,
        })
    }

    fn column_values(&self) -> Vec<Value> {
        vec![Value::from(self.name.as_str())]
    }

    fn entries(ctx: &PersistenceContext) -> &EntityEntries<Self> {
        &ctx.teams
    }

    fn entries_mut(ctx: &mut PersistenceContext) -> &mut EntityEntries<Self> {
        &mut ctx.teams
    }
}
