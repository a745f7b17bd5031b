//! Live state of in-flight runs
//!
//! [`StateStore`] holds the state of every run currently executing on a
//! compiled graph, keyed by run id. Each run's state sits behind its own
//! mutex, so merges coming from parallel tasks of one super-step are
//! serialized while different runs never contend.

use crate::error::{GraphError, Result};
use crate::state::StateSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::trace;

/// Per-run state container applying the schema's reducers on merge.
#[derive(Debug, Clone)]
pub struct StateStore {
    schema: Arc<StateSchema>,
    runs: Arc<RwLock<HashMap<String, Arc<Mutex<Value>>>>>,
}

impl StateStore {
    pub fn new(schema: Arc<StateSchema>) -> Self {
        Self {
            schema,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Install (or replace) the state of a run
    pub async fn insert(&self, run_id: &str, state: Value) {
        self.runs
            .write()
            .await
            .insert(run_id.to_string(), Arc::new(Mutex::new(state)));
    }

    async fn slot(&self, run_id: &str) -> Result<Arc<Mutex<Value>>> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| GraphError::RunNotFound(run_id.to_string()))
    }

    /// Current state of a run
    pub async fn get(&self, run_id: &str) -> Result<Value> {
        let slot = self.slot(run_id).await?;
        let state = slot.lock().await;
        Ok(state.clone())
    }

    /// Merge a partial state attributed to `node` and return the new state.
    ///
    /// Fields absent from `partial` are untouched; undeclared fields fail
    /// with [`GraphError::UnknownField`] and leave the state unchanged.
    pub async fn merge(&self, run_id: &str, partial: &Value, node: &str) -> Result<Value> {
        let slot = self.slot(run_id).await?;
        let mut state = slot.lock().await;
        self.schema
            .apply(&mut state, partial)
            .map_err(|e| GraphError::from_state(e, Some(node)))?;
        trace!(run_id = %run_id, node = %node, "Merged partial state");
        Ok(state.clone())
    }

    pub async fn remove(&self, run_id: &str) -> Option<Value> {
        let slot = self.runs.write().await.remove(run_id)?;
        let state = slot.lock().await;
        Some(state.clone())
    }

    pub async fn contains(&self, run_id: &str) -> bool {
        self.runs.read().await.contains_key(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> StateStore {
        StateStore::new(Arc::new(StateSchema::new().overwrite("topic").append("sections")))
    }

    #[tokio::test]
    async fn test_get_missing_run() {
        let err = store().get("nope").await.unwrap_err();
        assert!(matches!(err, GraphError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_merge_applies_reducers_in_call_order() {
        let store = store();
        store.insert("r", json!({"sections": ["old"]})).await;

        store.merge("r", &json!({"sections": ["p1"]}), "a").await.unwrap();
        let state = store.merge("r", &json!({"sections": ["p2"]}), "b").await.unwrap();

        assert_eq!(state["sections"], json!(["old", "p1", "p2"]));
    }

    #[tokio::test]
    async fn test_unknown_field_names_the_node() {
        let store = store();
        store.insert("r", json!({})).await;

        let err = store.merge("r", &json!({"extra": 1}), "writer").await.unwrap_err();
        match err {
            GraphError::UnknownField { field, node } => {
                assert_eq!(field, "extra");
                assert_eq!(node.as_deref(), Some("writer"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get("r").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_concurrent_merges_do_not_lose_writes() {
        let store = store();
        store.insert("r", json!({})).await;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.merge("r", &json!({"sections": [i]}), "writer").await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let state = store.remove("r").await.unwrap();
        assert_eq!(state["sections"].as_array().unwrap().len(), 16);
        assert!(!store.contains("r").await);
    }
}
