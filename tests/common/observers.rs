use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use entity_unit_of_work::{PersistenceResult, TransactionAware};

/// Records which transaction callbacks a session delivered.
pub struct LifecycleRecorder {
    committed: Arc<RwLock<bool>>,
    rolled_back: Arc<RwLock<bool>>,
}

impl LifecycleRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            committed: Arc::new(RwLock::new(false)),
            rolled_back: Arc::new(RwLock::new(false)),
        })
    }

    pub fn is_committed(&self) -> bool {
        *self.committed.read()
    }

    pub fn is_rolled_back(&self) -> bool {
        *self.rolled_back.read()
    }
}

#[async_trait]
impl TransactionAware for LifecycleRecorder {
    async fn on_commit(&self) -> PersistenceResult<()> {
        *self.committed.write() = true;
        Ok(())
    }

    async fn on_rollback(&self) -> PersistenceResult<()> {
        *self.rolled_back.write() = true;
        Ok(())
    }
}
