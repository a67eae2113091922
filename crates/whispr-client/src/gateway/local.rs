use std::sync::Arc;

use serde_json::Value;
use whispr_db::Database;
use whispr_types::api::{Filter, Select};

use super::Gateway;
use crate::error::{ClientError, Result};

/// Gateway over an in-process [`Database`]. Calls run on the blocking pool.
#[derive(Clone)]
pub struct LocalGateway {
    db: Arc<Database>,
}

impl LocalGateway {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fresh private in-memory store.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::open_in_memory()?)))
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> whispr_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ClientError::Transport(format!("store worker failed: {}", e)))?
            .map_err(ClientError::from)
    }
}

impl Gateway for LocalGateway {
    async fn query(&self, table: &str, select: &Select) -> Result<Vec<Value>> {
        let (table, select) = (table.to_string(), select.clone());
        self.run(move |db| db.select_rows(&table, &select)).await
    }

    async fn insert(&self, table: &str, rows: Value) -> Result<Vec<Value>> {
        let table = table.to_string();
        self.run(move |db| db.insert_rows(&table, &rows)).await
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<usize> {
        let (table, filters) = (table.to_string(), filters.to_vec());
        self.run(move |db| db.update_rows(&table, &filters, &patch)).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize> {
        let (table, filters) = (table.to_string(), filters.to_vec());
        self.run(move |db| db.delete_rows(&table, &filters)).await
    }

    async fn call(&self, procedure: &str, params: Value) -> Result<Value> {
        let procedure = procedure.to_string();
        self.run(move |db| db.call(&procedure, params)).await
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}
