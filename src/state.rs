//! Small typed facade over the state [`Table`].
//!
//! The state table holds single-valued items keyed by name, each with one
//! `value` attribute: the session cookie set (`SS`) and the
//! last-processed-date marker per vendor and processor version (`S`).

use crate::error::StateError;
use crate::storage::table::{AttributeValue, Item, ItemKey, Table};
use std::collections::BTreeSet;
use std::sync::Arc;

const VALUE: &str = "value";

/// Item name of the last-processed-date marker.
pub fn last_processed_date_key(vendor: &str, processor_version: &str) -> String {
    format!("{vendor}-last_processed_date-{processor_version}")
}

#[derive(Clone)]
pub struct StateStore {
    table: Arc<dyn Table>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    pub fn new(table: Arc<dyn Table>) -> Self {
        Self { table }
    }

    async fn value(&self, name: &str) -> Result<Option<AttributeValue>, StateError> {
        let item = self.table.get(&ItemKey::hash(name)).await?;
        Ok(item.and_then(|mut item| item.remove(VALUE)))
    }

    async fn put_value(&self, name: &str, value: AttributeValue) -> Result<(), StateError> {
        let mut item = Item::new();
        item.insert(VALUE.to_string(), value);
        self.table.put(&ItemKey::hash(name), item).await?;
        Ok(())
    }

    pub async fn get_string(&self, name: &str) -> Result<Option<String>, StateError> {
        match self.value(name).await? {
            None => Ok(None),
            Some(AttributeValue::S(s)) => Ok(Some(s)),
            Some(other) => Err(StateError::Malformed {
                key: name.to_string(),
                detail: format!("expected a string, found {other:?}"),
            }),
        }
    }

    pub async fn put_string(&self, name: &str, value: &str) -> Result<(), StateError> {
        self.put_value(name, AttributeValue::S(value.to_string())).await
    }

    pub async fn get_string_set(&self, name: &str) -> Result<Option<BTreeSet<String>>, StateError> {
        match self.value(name).await? {
            None => Ok(None),
            Some(AttributeValue::SS(set)) => Ok(Some(set)),
            Some(other) => Err(StateError::Malformed {
                key: name.to_string(),
                detail: format!("expected a string set, found {other:?}"),
            }),
        }
    }

    pub async fn put_string_set(&self, name: &str, values: BTreeSet<String>) -> Result<(), StateError> {
        self.put_value(name, AttributeValue::SS(values)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::table::MemoryTable;

    #[test]
    fn test_last_processed_date_key() {
        assert_eq!(
            last_processed_date_key("wsj", "20130825"),
            "wsj-last_processed_date-20130825"
        );
    }

    #[tokio::test]
    async fn test_string_and_set_values() {
        let state = StateStore::new(Arc::new(MemoryTable::new()));
        assert_eq!(state.get_string("missing").await.unwrap(), None);

        state.put_string("marker", "2013-08-25").await.unwrap();
        assert_eq!(
            state.get_string("marker").await.unwrap().as_deref(),
            Some("2013-08-25")
        );

        let set: BTreeSet<String> = ["a=1".to_string(), "b=2".to_string()].into();
        state.put_string_set("wsj_cookies", set.clone()).await.unwrap();
        assert_eq!(state.get_string_set("wsj_cookies").await.unwrap(), Some(set));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_malformed() {
        let state = StateStore::new(Arc::new(MemoryTable::new()));
        state.put_string("wsj_cookies", "oops").await.unwrap();
        let err = state.get_string_set("wsj_cookies").await.unwrap_err();
        assert!(matches!(err, StateError::Malformed { .. }));
    }
}
