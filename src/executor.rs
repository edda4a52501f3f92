use sqlx::postgres::PgRow;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::entity::{bind_values, Value};
use crate::{PersistenceError, PersistenceResult};

/// Executor wraps the database transaction of one session.
///
/// Clones share the same transaction. Once commit or rollback has taken it,
/// every statement fails with [`PersistenceError::TransactionClosed`].
#[derive(Clone, Debug)]
pub struct Executor {
    pub tx: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
    session_id: Uuid,
    show_sql: bool,
}

impl Executor {
    /// Creates a new Executor from a PostgreSQL transaction.
    pub fn new(tx: Transaction<'static, Postgres>, session_id: Uuid, show_sql: bool) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            session_id,
            show_sql,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Whether the transaction has not been committed or rolled back yet.
    pub async fn is_active(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    /// Takes ownership of the transaction, leaving None in its place.
    /// This should only be called when committing or rolling back.
    pub(crate) async fn take_transaction(&self) -> PersistenceResult<Transaction<'static, Postgres>> {
        self.tx
            .lock()
            .await
            .take()
            .ok_or(PersistenceError::TransactionClosed)
    }

    pub(crate) async fn execute(&self, sql: &str, values: &[Value]) -> PersistenceResult<u64> {
        let mut tx_guard = self.tx.lock().await;
        let tx = tx_guard.as_mut().ok_or(PersistenceError::TransactionClosed)?;
        self.log_statement(sql, values);
        let result = bind_values(sqlx::query(sql), values)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn fetch_one(&self, sql: &str, values: &[Value]) -> PersistenceResult<PgRow> {
        let mut tx_guard = self.tx.lock().await;
        let tx = tx_guard.as_mut().ok_or(PersistenceError::TransactionClosed)?;
        self.log_statement(sql, values);
        let row = bind_values(sqlx::query(sql), values)
            .fetch_one(&mut **tx)
            .await?;
        Ok(row)
    }

    pub(crate) async fn fetch_optional(
        &self,
        sql: &str,
        values: &[Value],
    ) -> PersistenceResult<Option<PgRow>> {
        let mut tx_guard = self.tx.lock().await;
        let tx = tx_guard.as_mut().ok_or(PersistenceError::TransactionClosed)?;
        self.log_statement(sql, values);
        let row = bind_values(sqlx::query(sql), values)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row)
    }

    pub(crate) async fn fetch_all(&self, sql: &str, values: &[Value]) -> PersistenceResult<Vec<PgRow>> {
        let mut tx_guard = self.tx.lock().await;
        let tx = tx_guard.as_mut().ok_or(PersistenceError::TransactionClosed)?;
        self.log_statement(sql, values);
        let rows = bind_values(sqlx::query(sql), values)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows)
    }

    fn log_statement(&self, sql: &str, values: &[Value]) {
        if self.show_sql {
            tracing::info!(session = %self.session_id, params = ?values, "{}", sql);
        } else {
            tracing::debug!(session = %self.session_id, params = ?values, "{}", sql);
        }
    }
}
