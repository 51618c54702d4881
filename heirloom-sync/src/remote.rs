//! Request/response interface to the hosted backend
//!
//! The concrete protocol is not this crate's concern; anything that can
//! create, update, delete and query JSON records by table implements
//! [`RemoteStore`]. [`InMemoryStore`] is a process-local implementation used
//! by tests and the CLI session.

use crate::error::RemoteError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Field equality filter for [`RemoteStore::query`]
pub type Filter = Map<String, Value>;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, table: &str, payload: Value) -> RemoteResult<Value>;
    async fn update(&self, table: &str, id: &str, payload: Value) -> RemoteResult<Value>;
    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()>;
    async fn query(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Value>>;
}

/// Tables of JSON records keyed by their `id` field.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    available: AtomicBool,
    fail_next: Mutex<Option<RemoteError>>,
    requests: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            fail_next: Mutex::new(None),
            requests: AtomicUsize::new(0),
        }
    }

    /// Simulate the backend becoming (un)reachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Make the next request fail with `error`.
    pub async fn fail_next(&self, error: RemoteError) {
        *self.fail_next.lock().await = Some(error);
    }

    /// Requests received so far, including failed ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub async fn records(&self, table: &str) -> Vec<Value> {
        self.tables.read().await.get(table).cloned().unwrap_or_default()
    }

    async fn check(&self) -> RemoteResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.is_available() {
            return Err(RemoteError::Unavailable("backend unreachable".to_string()));
        }
        if let Some(error) = self.fail_next.lock().await.take() {
            return Err(error);
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn into_object(table: &str, payload: Value) -> RemoteResult<Map<String, Value>> {
    match payload {
        Value::Object(map) => Ok(map),
        other => Err(RemoteError::Rejected(format!(
            "{table}: payload must be an object, got {other}"
        ))),
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn create(&self, table: &str, payload: Value) -> RemoteResult<Value> {
        self.check().await?;
        let mut record = into_object(table, payload)?;
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        record.insert("id".to_string(), Value::String(id.clone()));

        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        if rows.iter().any(|row| record_id(row) == Some(id.as_str())) {
            return Err(RemoteError::Rejected(format!("{table}/{id} already exists")));
        }

        let record = Value::Object(record);
        rows.push(record.clone());
        Ok(record)
    }

    async fn update(&self, table: &str, id: &str, payload: Value) -> RemoteResult<Value> {
        self.check().await?;
        let changes = into_object(table, payload)?;

        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| record_id(row) == Some(id)))
            .ok_or_else(|| RemoteError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;

        if let Value::Object(fields) = row {
            for (key, value) in changes {
                if key != "id" {
                    fields.insert(key, value);
                }
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()> {
        self.check().await?;

        let mut tables = self.tables.write().await;
        let rows = tables.get_mut(table).ok_or_else(|| RemoteError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        })?;
        let before = rows.len();
        rows.retain(|row| record_id(row) != Some(id));
        if rows.len() == before {
            return Err(RemoteError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn query(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Value>> {
        self.check().await?;

        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        filter
                            .iter()
                            .all(|(key, expected)| row.get(key) == Some(expected))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }
}
