//! Store factory: one manager per connection string, built lazily behind a
//! reader/writer lock.

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::manager::{Manager, PoolStats};
use crate::store::{
    DynamicStore, RoleBindingStore, RoleStore, SqlRoleBindingStore, SqlRoleStore, SqlUserStore,
    UserStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct StoreFactory {
    managers: RwLock<HashMap<String, Arc<Manager>>>,
}

impl StoreFactory {
    pub fn new() -> Self {
        StoreFactory {
            managers: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the manager for this config's DSN. The fast path takes
    /// the reader lock; on a miss the writer lock is taken and the map is
    /// re-checked before opening and initializing a new manager.
    pub async fn manager(&self, config: &DatabaseConfig) -> Result<Arc<Manager>> {
        let dsn = config.dsn();
        {
            let managers = self.managers.read().await;
            if let Some(manager) = managers.get(&dsn) {
                return Ok(manager.clone());
            }
        }

        let mut managers = self.managers.write().await;
        if let Some(manager) = managers.get(&dsn) {
            return Ok(manager.clone());
        }

        let manager = Arc::new(Manager::open(config).await?);
        manager.initialize().await?;
        managers.insert(dsn, manager.clone());
        Ok(manager)
    }

    pub async fn dynamic_store(&self, config: &DatabaseConfig) -> Result<Arc<DynamicStore>> {
        let manager = self.manager(config).await?;
        Ok(Arc::new(DynamicStore::new(manager)))
    }

    pub async fn user_store(&self, config: &DatabaseConfig) -> Result<Arc<dyn UserStore>> {
        let dynamic = self.dynamic_store(config).await?;
        Ok(Arc::new(SqlUserStore::new(dynamic)))
    }

    pub async fn role_store(&self, config: &DatabaseConfig) -> Result<Arc<dyn RoleStore>> {
        let dynamic = self.dynamic_store(config).await?;
        Ok(Arc::new(SqlRoleStore::new(dynamic)))
    }

    pub async fn role_binding_store(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Arc<dyn RoleBindingStore>> {
        let dynamic = self.dynamic_store(config).await?;
        Ok(Arc::new(SqlRoleBindingStore::new(dynamic)))
    }

    /// Close every managed pool and forget the managers.
    pub async fn close(&self) {
        let mut managers = self.managers.write().await;
        for (dsn, manager) in managers.drain() {
            tracing::debug!(dsn = %dsn, "closing manager");
            manager.close().await;
        }
    }

    /// Pool stats per connection string.
    pub async fn stats(&self) -> HashMap<String, PoolStats> {
        let managers = self.managers.read().await;
        let mut stats = HashMap::with_capacity(managers.len());
        for (dsn, manager) in managers.iter() {
            stats.insert(dsn.clone(), manager.stats().await);
        }
        stats
    }
}
