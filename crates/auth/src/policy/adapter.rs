//! Casbin adapter backed by a [`PolicyStore`].
//!
//! `p` rows are rules, `g` rows are role groupings. Whole-policy saves and
//! filtered loads are not supported; the store is the source of truth and
//! the engine never asks for either.

use std::sync::Arc;

use async_trait::async_trait;
use casbin::error::AdapterError;
use casbin::{Adapter, Filter, Model};

use super::{PolicyError, PolicyRule, PolicyStore, RoleGrouping, store::AddOutcome};

const RULE: &str = "p";
const GROUPING: &str = "g";

pub struct StoreAdapter {
    store: Arc<dyn PolicyStore>,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }
}

fn adapter_error(err: PolicyError) -> casbin::Error {
    casbin::Error::from(AdapterError(Box::new(err)))
}

fn unsupported(what: &str) -> casbin::Error {
    adapter_error(PolicyError::Store(format!("{what} is not supported by the policy store adapter")))
}

enum Row {
    Rule(PolicyRule),
    Grouping(RoleGrouping),
}

fn row(ptype: &str, values: &[String]) -> casbin::Result<Row> {
    let parsed = match ptype {
        RULE => PolicyRule::from_values(values).map(Row::Rule),
        GROUPING => RoleGrouping::from_values(values).map(Row::Grouping),
        _ => None,
    };
    parsed.ok_or_else(|| adapter_error(PolicyError::Store(format!("unsupported {ptype} row {values:?}"))))
}

#[async_trait]
impl Adapter for StoreAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        let set = self.store.load().await.map_err(adapter_error)?;
        for rule in &set.rules {
            m.add_policy(RULE, RULE, rule.values());
        }
        for grouping in &set.groupings {
            m.add_policy(GROUPING, GROUPING, grouping.values());
        }
        Ok(())
    }

    async fn load_filtered_policy<'a>(&mut self, _m: &mut dyn Model, _f: Filter<'a>) -> casbin::Result<()> {
        Err(unsupported("filtered loading"))
    }

    async fn save_policy(&mut self, _m: &mut dyn Model) -> casbin::Result<()> {
        Err(unsupported("saving the whole policy"))
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        Err(unsupported("clearing the policy"))
    }

    fn is_filtered(&self) -> bool {
        false
    }

    async fn add_policy(&mut self, _sec: &str, ptype: &str, rule: Vec<String>) -> casbin::Result<bool> {
        let outcome = match row(ptype, &rule)? {
            Row::Rule(rule) => self.store.add_rule(&rule).await,
            Row::Grouping(grouping) => self.store.add_grouping(&grouping).await,
        }
        .map_err(adapter_error)?;
        Ok(outcome == AddOutcome::Added)
    }

    async fn add_policies(&mut self, sec: &str, ptype: &str, rules: Vec<Vec<String>>) -> casbin::Result<bool> {
        let mut added = false;
        for rule in rules {
            added |= self.add_policy(sec, ptype, rule).await?;
        }
        Ok(added)
    }

    async fn remove_policy(&mut self, _sec: &str, ptype: &str, rule: Vec<String>) -> casbin::Result<bool> {
        match row(ptype, &rule)? {
            Row::Rule(rule) => self.store.remove_rule(&rule).await,
            Row::Grouping(grouping) => self.store.remove_grouping(&grouping).await,
        }
        .map_err(adapter_error)
    }

    async fn remove_policies(&mut self, sec: &str, ptype: &str, rules: Vec<Vec<String>>) -> casbin::Result<bool> {
        let mut removed = false;
        for rule in rules {
            removed |= self.remove_policy(sec, ptype, rule).await?;
        }
        Ok(removed)
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        Err(unsupported("filtered removal"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use casbin::{CoreApi, DefaultModel, Enforcer, MgmtApi};

    use super::*;
    use crate::policy::DEFAULT_MODEL;
    use crate::policy::store::testing::VecStore;

    fn adapter() -> (StoreAdapter, Arc<VecStore>) {
        let store = Arc::new(VecStore::default());
        (StoreAdapter::new(store.clone()), store)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn enforcer_loads_rules_and_groupings_from_the_store() {
        let (adapter, store) = adapter();
        {
            let mut set = store.set.lock().unwrap();
            set.rules.push(PolicyRule::new("viewer", "/reports", "GET"));
            set.groupings.push(RoleGrouping::new("editor", "viewer"));
        }

        let model = DefaultModel::from_str(DEFAULT_MODEL).await.unwrap();
        let enforcer = Enforcer::new(model, adapter).await.unwrap();
        assert_eq!(enforcer.get_policy(), vec![strings(&["viewer", "/reports", "GET"])]);
        assert!(enforcer.enforce(("editor", "/reports", "GET")).unwrap());
        assert!(!enforcer.enforce(("editor", "/reports", "PUT")).unwrap());
    }

    #[tokio::test]
    async fn writes_go_to_the_store() {
        let (mut adapter, store) = adapter();
        assert!(adapter.add_policy("p", "p", strings(&["user", "/a", "GET"])).await.unwrap());
        assert!(!adapter.add_policy("p", "p", strings(&["user", "/a", "GET"])).await.unwrap());
        assert!(adapter.add_policy("g", "g", strings(&["alice", "user"])).await.unwrap());
        assert_eq!(store.set.lock().unwrap().groupings, vec![RoleGrouping::new("alice", "user")]);

        assert!(adapter.remove_policy("p", "p", strings(&["user", "/a", "GET"])).await.unwrap());
        assert!(store.set.lock().unwrap().rules.is_empty());

        let err = adapter.add_policy("p", "p2", strings(&["user", "/a", "GET"])).await.unwrap_err();
        assert!(matches!(crate::policy::casbin_error(err), PolicyError::Store(_)));
    }

    #[tokio::test]
    async fn store_errors_come_back_unchanged() {
        let (adapter, store) = adapter();
        store.broken.store(true, Ordering::SeqCst);

        let model = DefaultModel::from_str(DEFAULT_MODEL).await.unwrap();
        let err = Enforcer::new(model, adapter).await.err().unwrap();
        assert_eq!(crate::policy::casbin_error(err), PolicyError::Store("backend offline".into()));
    }
}
