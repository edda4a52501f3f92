//! Entity query language: a `select` subset over mapped entity and attribute
//! names, compiled to PostgreSQL and executed inside a session.
//!
//! - `lexer`: tokens with byte offsets
//! - `parser`: statement syntax tree
//! - `compile`: metamodel validation and SQL generation

pub mod ast;
pub mod compile;
pub mod lexer;
pub mod parser;

use sqlx::postgres::PgRow;
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::entity::{decode_optional, decode_value, AssociationKind, Entity, EntityKind, Managed, Value};
use crate::error::QueryError;
use crate::model::{Member, Team};
use crate::persistence_context::{dedup_handles, PersistenceContext};
use crate::unit_of_work::{PostgresUnitOfWorkSession, UnitOfWorkSession};
use crate::{PersistenceError, PersistenceResult};

pub use compile::{compile, CompiledQuery, FetchPlan, Selection};
pub use parser::parse;

/// Parameter values and pagination bounds.
#[derive(Debug, Clone, Default)]
struct Bindings {
    parameters: HashMap<String, Value>,
    first_result: Option<usize>,
    max_results: Option<usize>,
}

impl Bindings {
    fn values(&self, compiled: &CompiledQuery) -> Result<Vec<Value>, QueryError> {
        compiled
            .parameters
            .iter()
            .map(|name| match self.parameters.get(name) {
                None => Err(QueryError::new(format!("parameter :{} is not bound", name))),
                // Untyped nulls cannot be compared; `= NULL` never matches anyway.
                Some(Value::Null) => Err(QueryError::new(format!(
                    "parameter :{} is bound to null",
                    name
                ))),
                Some(value) => Ok(value.clone()),
            })
            .collect()
    }

    fn is_paged(&self) -> bool {
        self.first_result.is_some() || self.max_results.is_some()
    }

    fn sql_suffix(&self) -> String {
        let mut suffix = String::new();
        if let Some(limit) = self.max_results {
            suffix.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.first_result {
            suffix.push_str(&format!(" OFFSET {}", offset));
        }
        suffix
    }

    fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.first_result.unwrap_or(0))
            .take(self.max_results.unwrap_or(usize::MAX))
            .collect()
    }
}

/// A query whose select list is a single entity of type `E`.
pub struct TypedQuery<'s, E: Entity> {
    session: &'s PostgresUnitOfWorkSession,
    jpql: String,
    compiled: CompiledQuery,
    bindings: Bindings,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, E: Entity> TypedQuery<'s, E> {
    pub(crate) fn new(session: &'s PostgresUnitOfWorkSession, jpql: &str) -> PersistenceResult<Self> {
        let compiled = compile(&parse(jpql)?)?;
        match &compiled.selection {
            Selection::Entity { kind, .. } if *kind == E::KIND => {}
            Selection::Entity { kind, .. } => {
                return Err(QueryError::new(format!(
                    "query selects {} but {} was requested",
                    kind.descriptor().name,
                    E::descriptor().name
                ))
                .into())
            }
            Selection::Projection { .. } => {
                return Err(QueryError::new(format!(
                    "query selects attributes, not {}; use a projection query",
                    E::descriptor().name
                ))
                .into())
            }
        }
        Ok(Self {
            session,
            jpql: jpql.to_string(),
            compiled,
            bindings: Bindings::default(),
            _entity: PhantomData,
        })
    }

    /// Bind a named parameter. Null values are rejected when the query runs.
    pub fn set_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.bindings.parameters.insert(name.to_string(), value.into());
        self
    }

    /// Position of the first result to retrieve (zero-based).
    pub fn set_first_result(mut self, first_result: usize) -> Self {
        self.bindings.first_result = Some(first_result);
        self
    }

    pub fn set_max_results(mut self, max_results: usize) -> Self {
        self.bindings.max_results = Some(max_results);
        self
    }

    pub fn jpql(&self) -> &str {
        &self.jpql
    }

    /// Generated SQL, without pagination.
    pub fn sql(&self) -> &str {
        &self.compiled.sql
    }

    /// Run the query and return managed instances.
    ///
    /// Without `distinct`, one element is returned per result row, so a join
    /// over a collection repeats the owner once per matched element.
    pub async fn get_result_list(&self) -> PersistenceResult<Vec<Managed<E>>> {
        let values = self.bindings.values(&self.compiled)?;
        let fetches: &[FetchPlan] = match &self.compiled.selection {
            Selection::Entity { fetches, .. } => fetches.as_slice(),
            Selection::Projection { .. } => &[],
        };

        self.session.flush().await?;

        let page_in_memory = self.compiled.pages_in_memory() && self.bindings.is_paged();
        let sql = if page_in_memory {
            tracing::warn!(
                session = %self.session.executor().session_id(),
                query = %self.jpql,
                "first_result/max_results specified with collection join; applying in memory"
            );
            self.compiled.sql.clone()
        } else {
            format!("{}{}", self.compiled.sql, self.bindings.sql_suffix())
        };

        let rows = self.session.executor().fetch_all(&sql, &values).await?;
        let results = {
            let mut ctx = self.session.context().lock();
            hydrate::<E>(&mut ctx, &rows, fetches)?
        };
        tracing::debug!(
            session = %self.session.executor().session_id(),
            rows = rows.len(),
            "query returned"
        );

        let results = if self.compiled.distinct {
            dedup_handles(results)
        } else {
            results
        };
        Ok(if page_in_memory {
            self.bindings.page(results)
        } else {
            results
        })
    }

    /// Run the query and return its only result.
    ///
    /// Repeated rows for the same instance count once; zero results fail with
    /// [`PersistenceError::NoResult`], several distinct instances with
    /// [`PersistenceError::NonUniqueResult`].
    pub async fn get_single_result(&self) -> PersistenceResult<Managed<E>> {
        let mut results = dedup_handles(self.get_result_list().await?);
        match results.len() {
            0 => Err(PersistenceError::NoResult),
            1 => Ok(results.remove(0)),
            n => Err(PersistenceError::NonUniqueResult(n)),
        }
    }
}

/// A query selecting attributes; each result row is a list of values in
/// select-list order.
pub struct ProjectionQuery<'s> {
    session: &'s PostgresUnitOfWorkSession,
    compiled: CompiledQuery,
    bindings: Bindings,
}

impl<'s> ProjectionQuery<'s> {
    pub(crate) fn new(session: &'s PostgresUnitOfWorkSession, jpql: &str) -> PersistenceResult<Self> {
        let compiled = compile(&parse(jpql)?)?;
        if let Selection::Entity { kind, .. } = &compiled.selection {
            return Err(QueryError::new(format!(
                "query selects {} entities; use a typed query",
                kind.descriptor().name
            ))
            .into());
        }
        Ok(Self {
            session,
            compiled,
            bindings: Bindings::default(),
        })
    }

    /// Bind a named parameter. Null values are rejected when the query runs.
    pub fn set_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.bindings.parameters.insert(name.to_string(), value.into());
        self
    }

    pub fn set_first_result(mut self, first_result: usize) -> Self {
        self.bindings.first_result = Some(first_result);
        self
    }

    pub fn set_max_results(mut self, max_results: usize) -> Self {
        self.bindings.max_results = Some(max_results);
        self
    }

    pub fn sql(&self) -> &str {
        &self.compiled.sql
    }

    pub async fn get_result_list(&self) -> PersistenceResult<Vec<Vec<Value>>> {
        let values = self.bindings.values(&self.compiled)?;
        let columns = match &self.compiled.selection {
            Selection::Projection { columns } => columns,
            Selection::Entity { .. } => return Err(QueryError::new("not a projection").into()),
        };

        self.session.flush().await?;
        let sql = format!("{}{}", self.compiled.sql, self.bindings.sql_suffix());
        let rows = self.session.executor().fetch_all(&sql, &values).await?;

        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(index, ty)| decode_value(row, index, *ty).map_err(PersistenceError::from))
                    .collect::<PersistenceResult<Vec<Value>>>()
            })
            .collect()
    }

    pub async fn get_single_result(&self) -> PersistenceResult<Vec<Value>> {
        let mut results = self.get_result_list().await?;
        match results.len() {
            0 => Err(PersistenceError::NoResult),
            1 => Ok(results.remove(0)),
            n => Err(PersistenceError::NonUniqueResult(n)),
        }
    }
}

/// Turn result rows into managed instances, registering fetched associations
/// and initializing fetched collections along the way.
fn hydrate<E: Entity>(
    ctx: &mut PersistenceContext,
    rows: &[PgRow],
    fetches: &[FetchPlan],
) -> PersistenceResult<Vec<Managed<E>>> {
    let mut results = Vec::with_capacity(rows.len());
    let mut collections: Vec<(i64, Vec<Managed<Member>>)> = Vec::new();

    for row in rows {
        let root = ctx.register(E::from_row(row, 0)?);
        let root_id = root.read().id();

        for fetch in fetches {
            let association = fetch.association;
            match (association.kind, association.target) {
                (AssociationKind::ManyToOne, EntityKind::Team) => {
                    register_optional::<Team>(ctx, row, fetch.offset)?;
                }
                (AssociationKind::ManyToOne, EntityKind::Member) => {
                    register_optional::<Member>(ctx, row, fetch.offset)?;
                }
                (AssociationKind::OneToMany, EntityKind::Member) => {
                    let Some(owner) = root_id else { continue };
                    let index = match collections.iter().position(|(id, _)| *id == owner) {
                        Some(index) => index,
                        None => {
                            collections.push((owner, Vec::new()));
                            collections.len() - 1
                        }
                    };
                    if let Some(member) = register_optional::<Member>(ctx, row, fetch.offset)? {
                        collections[index].1.push(member);
                    }
                }
                (AssociationKind::OneToMany, EntityKind::Team) => {
                    return Err(QueryError::new(format!(
                        "cannot fetch collection '{}'",
                        association.name
                    ))
                    .into());
                }
            }
        }

        results.push(root);
    }

    for (team_id, members) in collections {
        ctx.initialize_collection(team_id, members);
    }
    Ok(results)
}

fn register_optional<T: Entity>(
    ctx: &mut PersistenceContext,
    row: &PgRow,
    offset: usize,
) -> PersistenceResult<Option<Managed<T>>> {
    Ok(decode_optional::<T>(row, offset)?.map(|entity| ctx.register(entity)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(jpql: &str) -> CompiledQuery {
        compile(&parse(jpql).unwrap()).unwrap()
    }

    #[test]
    fn test_bindings_follow_placeholder_order() {
        let compiled = compiled("select m from Member m where m.age > :age and m.username = :name");
        let mut bindings = Bindings::default();
        bindings.parameters.insert("name".to_string(), Value::from("username1"));
        bindings.parameters.insert("age".to_string(), Value::from(5));
        assert_eq!(
            bindings.values(&compiled).unwrap(),
            vec![Value::Int(5), Value::Text("username1".to_string())]
        );
    }

    #[test]
    fn test_unbound_and_null_parameters_are_rejected() {
        let compiled = compiled("select m from Member m where m.username = :name");
        let bindings = Bindings::default();
        let err = bindings.values(&compiled).unwrap_err();
        assert!(err.message.contains("not bound"));

        let mut bindings = Bindings::default();
        bindings.parameters.insert("name".to_string(), Value::from(None::<String>));
        let err = bindings.values(&compiled).unwrap_err();
        assert!(err.message.contains("bound to null"));
    }

    #[test]
    fn test_page_applies_offset_then_limit() {
        let bindings = Bindings {
            first_result: Some(1),
            max_results: Some(2),
            ..Bindings::default()
        };
        assert_eq!(bindings.page(vec![1, 2, 3, 4]), vec![2, 3]);
        assert_eq!(bindings.sql_suffix(), " LIMIT 2 OFFSET 1");
    }
}
