use async_trait::async_trait;

use crate::PersistenceResult;

/// Trait for components that need to be notified of transaction lifecycle events.
///
/// Components implementing this trait can be registered with a session to
/// receive callbacks once the database transaction has been committed or rolled
/// back. The persistence context is already detached by the time they run, so
/// handles held by an observer reflect the final in-memory state.
#[async_trait]
pub trait TransactionAware: Send + Sync {
    /// Called after a successful transaction commit.
    async fn on_commit(&self) -> PersistenceResult<()>;

    /// Called after a transaction rollback.
    ///
    /// Implementations should use this to revert any in-memory state changes
    /// that were made during the transaction.
    async fn on_rollback(&self) -> PersistenceResult<()>;
}
