//! Session cookies for authenticated vendor fetches.
//!
//! The [`CookieStore`] owns the current [`CookieSet`], renders it as a
//! `Cookie` request header and replaces it when a redirect chain hands out a
//! complete new set of session cookies. Every [`CookieStore::update`] is
//! persisted to the state table immediately, so the next run starts from the
//! latest cookies.

use crate::error::StateError;
use crate::state::StateStore;
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// State item holding the persisted cookie pairs.
pub const COOKIE_ITEM: &str = "wsj_cookies";

/// Named cookie values, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieSet {
    values: BTreeMap<String, String>,
}

impl CookieSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from `name=value` pairs; entries without `=` are ignored.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = pairs
            .into_iter()
            .filter_map(|pair| {
                let (name, value) = pair.as_ref().split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { values }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Overlay `other`; its values win.
    pub fn merge(&mut self, other: &CookieSet) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    pub fn contains_all<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names.into_iter().all(|name| self.values.contains_key(name))
    }

    /// `name=value` pairs in name order.
    pub fn pairs(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect()
    }

    /// Value for a `Cookie` request header: pairs joined by `"; "`.
    pub fn header_value(&self) -> String {
        self.pairs().iter().join("; ")
    }
}

/// Which `Set-Cookie` names a vendor cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePolicy {
    /// Names kept from responses; everything else is dropped.
    pub recognized: Vec<&'static str>,
    /// Names that must all be present before the stored set is replaced.
    pub required: Vec<&'static str>,
}

impl CookiePolicy {
    pub fn is_complete(&self, set: &CookieSet) -> bool {
        set.contains_all(self.required.iter().copied())
    }
}

/// Parse `Set-Cookie` header values into the recognized `name=value` pairs.
///
/// Each header is split on `;`; segments that are `name=value` with a
/// recognized name are kept, attributes like `path=/` or `HttpOnly` are not.
pub fn parse_set_cookie<'a>(headers: impl IntoIterator<Item = &'a str>, policy: &CookiePolicy) -> CookieSet {
    let mut set = CookieSet::new();
    for header in headers {
        for segment in header.split(';') {
            let Some((name, value)) = segment.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if policy.recognized.contains(&name) {
                set.insert(name, value.trim());
            }
        }
    }
    set
}

/// Current cookie set plus its persistence.
#[derive(Debug, Clone)]
pub struct CookieStore {
    state: StateStore,
    current: CookieSet,
}

impl CookieStore {
    /// Load the persisted cookie set; an absent item yields an empty set.
    #[instrument(level = "info", skip_all)]
    pub async fn load(state: StateStore) -> Result<Self, StateError> {
        let pairs = state.get_string_set(COOKIE_ITEM).await?.unwrap_or_default();
        let current = CookieSet::from_pairs(&pairs);
        info!(count = current.len(), "Loaded session cookies");
        Ok(Self { state, current })
    }

    pub fn current(&self) -> &CookieSet {
        &self.current
    }

    pub fn header_value(&self) -> String {
        self.current.header_value()
    }

    /// Replace the current set and persist it.
    #[instrument(level = "info", skip_all, fields(count = cookies.len()))]
    pub async fn update(&mut self, cookies: CookieSet) -> Result<(), StateError> {
        if cookies == self.current {
            debug!("Cookie set unchanged; skipping persist");
            return Ok(());
        }
        self.state
            .put_string_set(COOKIE_ITEM, cookies.pairs().into_iter().collect())
            .await?;
        self.current = cookies;
        info!("Persisted new session cookies");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::table::MemoryTable;
    use std::sync::Arc;

    fn policy() -> CookiePolicy {
        CookiePolicy {
            recognized: vec!["djcs_auto", "djcs_perm", "djcs_session"],
            required: vec!["djcs_auto", "djcs_perm"],
        }
    }

    #[test]
    fn test_header_value_joins_pairs() {
        let set = CookieSet::from_pairs(["djcs_perm=Y", "djcs_auto=X", "garbage"]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.header_value(), "djcs_auto=X; djcs_perm=Y");
    }

    #[test]
    fn test_parse_set_cookie_filters_names_and_attributes() {
        let set = parse_set_cookie(
            [
                "djcs_auto=X; path=/; domain=.wsj.com; HttpOnly",
                "tracking=1; path=/",
            ],
            &policy(),
        );
        assert_eq!(set.pairs(), vec!["djcs_auto=X".to_string()]);
        assert!(!policy().is_complete(&set));
    }

    #[test]
    fn test_values_may_contain_equals() {
        let set = parse_set_cookie(["djcs_perm=a=b==; path=/"], &policy());
        assert_eq!(set.get("djcs_perm"), Some("a=b=="));
    }

    #[test]
    fn test_policy_completeness() {
        let mut set = CookieSet::new();
        set.insert("djcs_auto", "X");
        assert!(!policy().is_complete(&set));
        set.insert("djcs_perm", "Y");
        assert!(policy().is_complete(&set));
    }

    #[tokio::test]
    async fn test_update_persists_across_loads() {
        let table = Arc::new(MemoryTable::new());
        let mut store = CookieStore::load(StateStore::new(table.clone())).await.unwrap();
        assert!(store.current().is_empty());

        store
            .update(CookieSet::from_pairs(["djcs_auto=X", "djcs_perm=Y"]))
            .await
            .unwrap();

        let reloaded = CookieStore::load(StateStore::new(table)).await.unwrap();
        assert_eq!(reloaded.header_value(), "djcs_auto=X; djcs_perm=Y");
    }
}
