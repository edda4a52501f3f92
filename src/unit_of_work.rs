use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{PersistenceUnitConfig, SchemaGeneration};
use crate::entity::{Entity, Managed, Value};
use crate::model::{Member, Team};
use crate::persistence_context::PersistenceContext;
use crate::query::{ProjectionQuery, TypedQuery};
use crate::{schema, Executor, PersistenceError, PersistenceResult, TransactionAware};

/// Unit of Work pattern for managing database transactions.
///
/// The UnitOfWork manages the lifecycle of database transactions and provides
/// a factory method to create new transaction sessions.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Session: UnitOfWorkSession;

    /// Begin a new transaction session.
    async fn begin(&self) -> PersistenceResult<Self::Session>;
}

/// Represents a single database transaction session.
///
/// This trait provides the core transaction management operations and a
/// mechanism to register transaction-aware components that need to be
/// notified of transaction lifecycle events.
#[async_trait]
pub trait UnitOfWorkSession: Send + Sync {
    /// Get the executor for this session (provides access to the transaction).
    fn executor(&self) -> &Executor;

    /// Register a component that needs to be notified of transaction events.
    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>);

    /// Flush pending changes, commit, and notify all registered observers.
    async fn commit(self) -> PersistenceResult<()>;

    /// Rollback the transaction and notify all registered observers.
    async fn rollback(self) -> PersistenceResult<()>;

    /// Release the session. A transaction that is still open is rolled back.
    async fn close(self) -> PersistenceResult<()>;
}

/// Default implementation of UnitOfWork for PostgreSQL.
///
/// Plays the role of a session factory for one persistence unit: it owns the
/// connection pool and hands out one session per transaction.
pub struct PostgresUnitOfWork {
    pool: Arc<PgPool>,
    show_sql: bool,
    schema_generation: SchemaGeneration,
}

impl PostgresUnitOfWork {
    /// Create a new PostgresUnitOfWork with the given connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            show_sql: false,
            schema_generation: SchemaGeneration::None,
        }
    }

    /// Log every statement at info level instead of debug.
    pub fn with_show_sql(mut self, show_sql: bool) -> Self {
        self.show_sql = show_sql;
        self
    }

    /// Open the pool for a persistence unit and apply its schema generation
    /// setting.
    pub async fn connect(unit: &PersistenceUnitConfig) -> PersistenceResult<Self> {
        tracing::info!(unit = %unit.name, max_connections = unit.max_connections, "opening persistence unit");
        let pool = PgPoolOptions::new()
            .max_connections(unit.max_connections)
            .acquire_timeout(Duration::from_secs(unit.acquire_timeout_secs))
            .connect(&unit.url)
            .await?;

        match unit.schema_generation {
            SchemaGeneration::None => {}
            SchemaGeneration::Create => schema::create_schema(&pool).await?,
            SchemaGeneration::CreateDrop => {
                schema::drop_schema(&pool).await?;
                schema::create_schema(&pool).await?;
            }
        }

        Ok(Self {
            pool: Arc::new(pool),
            show_sql: unit.show_sql,
            schema_generation: unit.schema_generation,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `work` in its own session.
    ///
    /// The session is committed when `work` succeeds. Any error rolls it back
    /// and is returned after logging. Either way the session is closed before
    /// this returns.
    pub async fn transactional<T, F, Fut>(&self, work: F) -> PersistenceResult<T>
    where
        F: FnOnce(PostgresUnitOfWorkSession) -> Fut + Send,
        Fut: Future<Output = PersistenceResult<T>> + Send,
        T: Send,
    {
        let session = self.begin().await?;
        let session_id = session.executor().session_id();

        match work(session.clone()).await {
            Ok(value) => match session.commit().await {
                Ok(()) => Ok(value),
                Err(err) => {
                    tracing::error!(session = %session_id, error = %err, "unit of work failed to commit");
                    Err(err)
                }
            },
            Err(err) => {
                tracing::error!(session = %session_id, error = %err, "unit of work failed, rolling back");
                if let Err(close_err) = session.close().await {
                    tracing::warn!(session = %session_id, error = %close_err, "failed to release session");
                }
                Err(err)
            }
        }
    }

    /// Close the pool, dropping the schema first under `create-drop`.
    pub async fn close(self) -> PersistenceResult<()> {
        if self.schema_generation == SchemaGeneration::CreateDrop {
            schema::drop_schema(&self.pool).await?;
        }
        self.pool.close().await;
        tracing::info!("persistence unit closed");
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    type Session = PostgresUnitOfWorkSession;

    async fn begin(&self) -> PersistenceResult<Self::Session> {
        let tx = self.pool.begin().await?;
        Ok(PostgresUnitOfWorkSession::new(tx, self.show_sql))
    }
}

/// Default implementation of UnitOfWorkSession for PostgreSQL.
///
/// Clones share the transaction and the persistence context. Entities loaded
/// or persisted through the session stay managed until the transaction ends:
/// changes to them are written on flush without an explicit update call.
///
/// Dropping the last clone without committing rolls the transaction back.
#[derive(Clone)]
pub struct PostgresUnitOfWorkSession {
    executor: Executor,
    observers: Arc<RwLock<Vec<Arc<dyn TransactionAware>>>>,
    context: Arc<Mutex<PersistenceContext>>,
}

impl PostgresUnitOfWorkSession {
    /// Create a new session from a PostgreSQL transaction.
    pub fn new(tx: Transaction<'static, Postgres>, show_sql: bool) -> Self {
        let session_id = Uuid::new_v4();
        tracing::debug!(session = %session_id, "session opened");
        Self {
            executor: Executor::new(tx, session_id, show_sql),
            observers: Arc::new(RwLock::new(Vec::new())),
            context: Arc::new(Mutex::new(PersistenceContext::new())),
        }
    }

    pub(crate) fn context(&self) -> &Mutex<PersistenceContext> {
        &self.context
    }

    /// Insert a transient entity and make it managed.
    ///
    /// The row is written immediately so the generated identifier is known.
    pub async fn persist<E: Entity>(&self, mut entity: E) -> PersistenceResult<Managed<E>> {
        if let Some(id) = entity.id() {
            return Err(PersistenceError::DetachedEntity(format!(
                "{}#{}",
                E::descriptor().name,
                id
            )));
        }
        let descriptor = E::descriptor();
        let row = self
            .executor
            .fetch_one(&descriptor.insert_sql(), &entity.column_values())
            .await?;
        entity.set_id(row.try_get("id")?);
        Ok(self.context.lock().register(entity))
    }

    /// Look up an entity by identifier, consulting the persistence context
    /// before the database.
    pub async fn find<E: Entity>(&self, id: i64) -> PersistenceResult<Option<Managed<E>>> {
        {
            let ctx = self.context.lock();
            if let Some(handle) = ctx.get::<E>(id) {
                return Ok(Some(handle));
            }
            if ctx.pending_removals::<E>().contains(&id) {
                return Ok(None);
            }
        }

        let descriptor = E::descriptor();
        let row = self
            .executor
            .fetch_optional(&descriptor.find_sql(), &[Value::BigInt(id)])
            .await?;
        match row {
            Some(row) => {
                let entity = E::from_row(&row, 0)?;
                Ok(Some(self.context.lock().register(entity)))
            }
            None => Ok(None),
        }
    }

    /// Schedule a managed entity for deletion at the next flush.
    pub fn remove<E: Entity>(&self, handle: &Managed<E>) -> PersistenceResult<()> {
        let mut ctx = self.context.lock();
        if !ctx.contains(handle) {
            return Err(not_managed(handle));
        }
        if let Some(id) = handle.read().id() {
            ctx.schedule_removal::<E>(id);
        }
        Ok(())
    }

    /// Write pending updates and deletions to the database.
    pub async fn flush(&self) -> PersistenceResult<()> {
        self.flush_updates::<Team>().await?;
        self.flush_updates::<Member>().await?;
        self.flush_removals::<Member>().await?;
        self.flush_removals::<Team>().await?;
        Ok(())
    }

    async fn flush_updates<E: Entity>(&self) -> PersistenceResult<()> {
        let dirty = self.context.lock().dirty::<E>();
        if dirty.is_empty() {
            return Ok(());
        }
        let sql = E::descriptor().update_sql();
        for (id, state) in dirty {
            let mut values = state.column_values();
            values.push(Value::BigInt(id));
            self.executor.execute(&sql, &values).await?;
            self.context.lock().mark_clean(id, state);
        }
        Ok(())
    }

    async fn flush_removals<E: Entity>(&self) -> PersistenceResult<()> {
        let removals = self.context.lock().pending_removals::<E>();
        if removals.is_empty() {
            return Ok(());
        }
        let sql = E::descriptor().delete_sql();
        for id in removals {
            self.executor.execute(&sql, &[Value::BigInt(id)]).await?;
            self.context.lock().evict::<E>(id);
        }
        Ok(())
    }

    /// Whether `handle` is the instance this session manages for its id.
    pub fn contains<E: Entity>(&self, handle: &Managed<E>) -> bool {
        self.context.lock().contains(handle)
    }

    /// Stop managing one entity. Unflushed changes to it are not written.
    pub fn detach<E: Entity>(&self, handle: &Managed<E>) {
        let mut ctx = self.context.lock();
        if !ctx.contains(handle) {
            return;
        }
        if let Some(id) = handle.read().id() {
            ctx.evict::<E>(id);
        }
    }

    /// Detach every managed entity. Unflushed changes are not written.
    pub fn clear(&self) {
        self.context.lock().clear();
    }

    /// Point `member` at `team`, keeping an initialized `team.members`
    /// collection in step.
    pub fn assign_team(&self, member: &Managed<Member>, team: &Managed<Team>) -> PersistenceResult<()> {
        let team_id = team.read().id;
        let team_id = team_id.ok_or_else(|| not_managed(team))?;
        member.write().team_id = Some(team_id);
        let mut ctx = self.context.lock();
        if ctx.contains(member) {
            ctx.relink_member(member, team_id);
        }
        Ok(())
    }

    /// Navigate `member.team`.
    pub async fn team_of(&self, member: &Managed<Member>) -> PersistenceResult<Option<Managed<Team>>> {
        let team_id = member.read().team_id;
        match team_id {
            Some(id) => self.find::<Team>(id).await,
            None => Ok(None),
        }
    }

    /// Navigate `team.members`, loading the collection on first access
    /// unless a fetch join already initialized it.
    pub async fn members_of(&self, team: &Managed<Team>) -> PersistenceResult<Vec<Managed<Member>>> {
        let team_id = team.read().id;
        let team_id = team_id.ok_or_else(|| not_managed(team))?;
        let initialized = self.context.lock().collection(team_id);
        if let Some(members) = initialized {
            return Ok(members);
        }

        self.flush().await?;
        let descriptor = Member::descriptor();
        let sql = format!(
            "SELECT {} FROM {} WHERE team_id = $1 ORDER BY id",
            descriptor.select_list(None),
            descriptor.table
        );
        let rows = self.executor.fetch_all(&sql, &[Value::BigInt(team_id)]).await?;

        let mut ctx = self.context.lock();
        let mut members = Vec::with_capacity(rows.len());
        for row in &rows {
            members.push(ctx.register(Member::from_row(row, 0)?));
        }
        // Managed members whose foreign key now points elsewhere stay out.
        members.retain(|m| m.read().team_id == Some(team_id));
        Ok(ctx.initialize_collection(team_id, members))
    }

    /// Prepare a query selecting entities of type `E`.
    pub fn create_query<E: Entity>(&self, jpql: &str) -> PersistenceResult<TypedQuery<'_, E>> {
        TypedQuery::new(self, jpql)
    }

    /// Prepare a query selecting attributes.
    pub fn create_projection(&self, jpql: &str) -> PersistenceResult<ProjectionQuery<'_>> {
        ProjectionQuery::new(self, jpql)
    }

    /// Number of entities currently managed.
    pub fn managed_count(&self) -> usize {
        self.context.lock().managed_count()
    }

    async fn finish_rollback(&self, tx: Transaction<'static, Postgres>) -> PersistenceResult<()> {
        let result = tx
            .rollback()
            .await
            .map_err(|e| PersistenceError::RollbackFailed(e.to_string()));
        self.context.lock().clear();
        result?;
        tracing::debug!(session = %self.executor.session_id(), "transaction rolled back");

        // Notify observers after successful rollback
        let observers = self.observers.read().clone();
        for observer in observers.iter() {
            observer.on_rollback().await?;
        }
        Ok(())
    }
}

fn not_managed<E: Entity>(handle: &Managed<E>) -> PersistenceError {
    let entity = handle.read();
    PersistenceError::NotManaged(format!("{:?}", *entity))
}

#[async_trait]
impl UnitOfWorkSession for PostgresUnitOfWorkSession {
    fn executor(&self) -> &Executor {
        &self.executor
    }

    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.observers.write().push(observer);
    }

    async fn commit(self) -> PersistenceResult<()> {
        if let Err(err) = self.flush().await {
            tracing::warn!(session = %self.executor.session_id(), error = %err, "flush failed, rolling back");
            let tx = self.executor.take_transaction().await?;
            self.finish_rollback(tx).await?;
            return Err(err);
        }

        // Take ownership of the transaction
        let tx = self.executor.take_transaction().await?;

        // Commit the transaction; everything is detached whatever the outcome
        let result = tx
            .commit()
            .await
            .map_err(|e| PersistenceError::CommitFailed(e.to_string()));
        self.context.lock().clear();
        result?;
        tracing::debug!(session = %self.executor.session_id(), "transaction committed");

        // Notify observers after successful commit
        let observers = self.observers.read().clone();
        for observer in observers.iter() {
            observer.on_commit().await?;
        }
        Ok(())
    }

    async fn rollback(self) -> PersistenceResult<()> {
        // Take ownership of the transaction
        let tx = self.executor.take_transaction().await?;
        self.finish_rollback(tx).await
    }

    async fn close(self) -> PersistenceResult<()> {
        let open = self.executor.tx.lock().await.take();
        match open {
            Some(tx) => {
                tracing::debug!(session = %self.executor.session_id(), "closing session with open transaction");
                self.finish_rollback(tx).await
            }
            None => {
                self.context.lock().clear();
                Ok(())
            }
        }
    }
}
