//! Entity Unit of Work
//!
//! Transactional sessions over PostgreSQL for the `Member` and `Team` entities:
//! an identity map with dirty checking per session, a small entity query
//! language compiled to SQL, and a unit-of-work wrapper that commits on
//! success, rolls back on failure and always releases the session.

pub mod config;
pub mod entity;
pub mod error;
pub mod executor;
pub mod model;
pub mod persistence_context;
pub mod query;
pub mod schema;
pub mod transaction_aware;
pub mod unit_of_work;

pub use config::{PersistenceConfig, PersistenceUnitConfig, SchemaGeneration};
pub use entity::{Entity, EntityKind, Managed, Value};
pub use error::{PersistenceError, PersistenceResult, QueryError};
pub use executor::Executor;
pub use model::{Member, Team};
pub use query::{ProjectionQuery, TypedQuery};
pub use transaction_aware::TransactionAware;
pub use unit_of_work::{PostgresUnitOfWork, PostgresUnitOfWorkSession, UnitOfWork, UnitOfWorkSession};
