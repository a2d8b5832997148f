//! Policy decision point.
//!
//! The engine holds a casbin [`Enforcer`] built from the store. Readers load
//! the current enforcer without locking, so a decision always sees one
//! consistent rule set. Mutations go to the store first, are serialized by
//! an async mutex, and publish a freshly loaded enforcer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use arc_swap::ArcSwap;
use casbin::{CoreApi, Enforcer, MgmtApi};
use tracing::{debug, info, instrument};

use super::{AddOutcome, PolicyError, PolicyModel, PolicyRule, PolicyStore, RoleGrouping, StoreAdapter, casbin_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub struct PolicyEngine {
    model: PolicyModel,
    store: Arc<dyn PolicyStore>,
    current: ArcSwap<Enforcer>,
    writer: tokio::sync::Mutex<()>,
}

impl core::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("matcher", &self.model.matcher_source())
            .finish_non_exhaustive()
    }
}

async fn load_enforcer(model: &PolicyModel, store: &Arc<dyn PolicyStore>) -> Result<Enforcer, PolicyError> {
    let enforcer = Enforcer::new(model.compile().await?, StoreAdapter::new(Arc::clone(store)))
        .await
        .map_err(casbin_error)?;
    info!(
        rules = enforcer.get_policy().len(),
        groupings = enforcer.get_grouping_policy().len(),
        "policy loaded"
    );
    Ok(enforcer)
}

impl PolicyEngine {
    /// Build an engine and load its first enforcer from `store`.
    pub async fn new(model: PolicyModel, store: Arc<dyn PolicyStore>) -> Result<Self, PolicyError> {
        let enforcer = load_enforcer(&model, &store).await?;
        Ok(Self {
            model,
            store,
            current: ArcSwap::from_pointee(enforcer),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    async fn refresh(&self) -> Result<(), PolicyError> {
        let next = load_enforcer(&self.model, &self.store).await?;
        self.current.store(Arc::new(next));
        Ok(())
    }

    /// Allow iff at least one rule satisfies the matcher.
    pub fn decide(&self, subject: &str, object: &str, action: &str) -> Result<Decision, PolicyError> {
        let allowed = self
            .current
            .load()
            .enforce((subject, object, action))
            .map_err(casbin_error)?;
        let decision = if allowed { Decision::Allow } else { Decision::Deny };

        debug!(subject, object, action, ?decision, "policy decision");
        Ok(decision)
    }

    pub fn has_rule(&self, rule: &PolicyRule) -> bool {
        self.current.load().has_policy(rule.values())
    }

    pub fn has_grouping(&self, grouping: &RoleGrouping) -> bool {
        self.current.load().has_grouping_policy(grouping.values())
    }

    pub fn rules(&self) -> Vec<PolicyRule> {
        self.current
            .load()
            .get_policy()
            .iter()
            .filter_map(|values| PolicyRule::from_values(values))
            .collect()
    }

    pub fn groupings(&self) -> Vec<RoleGrouping> {
        self.current
            .load()
            .get_grouping_policy()
            .iter()
            .filter_map(|values| RoleGrouping::from_values(values))
            .collect()
    }

    /// Every role `role` transitively inherits from, sorted.
    pub fn roles_for(&self, role: &str) -> Vec<String> {
        let mut direct: HashMap<String, Vec<String>> = HashMap::new();
        for g in self.groupings() {
            direct.entry(g.child).or_default().push(g.parent);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([role]);
        while let Some(current) = queue.pop_front() {
            for parent in direct.get(current).into_iter().flatten() {
                if parent != role && seen.insert(parent.as_str()) {
                    queue.push_back(parent.as_str());
                }
            }
        }

        let mut roles: Vec<String> = seen.into_iter().map(str::to_string).collect();
        roles.sort();
        roles
    }

    #[instrument(skip(self), fields(rule = %rule), err)]
    pub async fn add_rule(&self, rule: PolicyRule) -> Result<AddOutcome, PolicyError> {
        let _guard = self.writer.lock().await;
        let outcome = self.store.add_rule(&rule).await?;
        if outcome == AddOutcome::Added || !self.has_rule(&rule) {
            self.refresh().await?;
        }
        Ok(outcome)
    }

    #[instrument(skip(self), fields(rule = %rule), err)]
    pub async fn remove_rule(&self, rule: &PolicyRule) -> Result<bool, PolicyError> {
        let _guard = self.writer.lock().await;
        let removed = self.store.remove_rule(rule).await?;
        if removed || self.has_rule(rule) {
            self.refresh().await?;
        }
        Ok(removed)
    }

    #[instrument(skip(self), fields(grouping = %grouping), err)]
    pub async fn add_grouping(&self, grouping: RoleGrouping) -> Result<AddOutcome, PolicyError> {
        let _guard = self.writer.lock().await;
        let outcome = self.store.add_grouping(&grouping).await?;
        if outcome == AddOutcome::Added || !self.has_grouping(&grouping) {
            self.refresh().await?;
        }
        Ok(outcome)
    }

    #[instrument(skip(self), fields(grouping = %grouping), err)]
    pub async fn remove_grouping(&self, grouping: &RoleGrouping) -> Result<bool, PolicyError> {
        let _guard = self.writer.lock().await;
        let removed = self.store.remove_grouping(grouping).await?;
        if removed || self.has_grouping(grouping) {
            self.refresh().await?;
        }
        Ok(removed)
    }

    /// Replace the enforcer with one loaded from the store's current contents.
    #[instrument(skip(self), err)]
    pub async fn reload(&self) -> Result<(), PolicyError> {
        let _guard = self.writer.lock().await;
        self.refresh().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DEFAULT_MODEL;
    use crate::policy::store::testing::VecStore;
    use proptest::prelude::*;
    use std::sync::atomic::Ordering;

    async fn engine() -> (PolicyEngine, Arc<VecStore>) {
        let store = Arc::new(VecStore::default());
        let model = PolicyModel::parse(DEFAULT_MODEL).await.unwrap();
        let engine = PolicyEngine::new(model, store.clone()).await.unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn empty_policy_denies() {
        let (engine, _) = engine().await;
        assert_eq!(engine.decide("admin", "/users/", "GET").unwrap(), Decision::Deny);
    }

    #[tokio::test]
    async fn wildcard_admin_rule() {
        let (engine, _) = engine().await;
        engine.add_rule(PolicyRule::new("admin", "*", "*")).await.unwrap();
        assert!(engine.decide("admin", "/users/:id", "DELETE").unwrap().is_allowed());
        assert!(!engine.decide("user", "/users/:id", "DELETE").unwrap().is_allowed());
    }

    #[tokio::test]
    async fn duplicate_rule_is_reported() {
        let (engine, _) = engine().await;
        let rule = PolicyRule::new("user", "/users/:id", "GET");
        assert_eq!(engine.add_rule(rule.clone()).await.unwrap(), AddOutcome::Added);
        assert_eq!(engine.add_rule(rule.clone()).await.unwrap(), AddOutcome::Duplicate);
        assert_eq!(engine.rules(), vec![rule]);
    }

    #[tokio::test]
    async fn transitive_inheritance() {
        let (engine, _) = engine().await;
        engine.add_rule(PolicyRule::new("viewer", "/reports", "GET")).await.unwrap();
        engine.add_grouping(RoleGrouping::new("editor", "viewer")).await.unwrap();
        engine.add_grouping(RoleGrouping::new("chief", "editor")).await.unwrap();

        assert!(engine.decide("chief", "/reports", "GET").unwrap().is_allowed());
        assert!(!engine.decide("viewer", "/reports", "PUT").unwrap().is_allowed());
        assert_eq!(engine.roles_for("chief"), vec!["editor", "viewer"]);
        assert!(engine.has_grouping(&RoleGrouping::new("chief", "editor")));
    }

    #[tokio::test]
    async fn wildcard_subject_matches_every_role() {
        let (engine, _) = engine().await;
        engine.add_rule(PolicyRule::new("*", "/x", "GET")).await.unwrap();
        assert!(engine.decide("user", "/x", "GET").unwrap().is_allowed());
        assert!(engine.decide("anonymous", "/x", "GET").unwrap().is_allowed());
        assert!(!engine.decide("user", "/x", "PUT").unwrap().is_allowed());
        assert!(!engine.decide("user", "/y", "GET").unwrap().is_allowed());
    }

    #[tokio::test]
    async fn store_failure_on_first_load_is_an_error() {
        let store = Arc::new(VecStore::default());
        store.broken.store(true, Ordering::SeqCst);
        let model = PolicyModel::parse(DEFAULT_MODEL).await.unwrap();
        let err = PolicyEngine::new(model, store).await.unwrap_err();
        assert_eq!(err, PolicyError::Store("backend offline".into()));
    }

    #[tokio::test]
    async fn readers_see_a_consistent_enforcer_during_writes() {
        let (engine, _) = engine().await;
        let engine = Arc::new(engine);
        engine.add_rule(PolicyRule::new("user", "/a", "GET")).await.unwrap();

        let writer = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for n in 0..20 {
                    engine.add_rule(PolicyRule::new("user", format!("/b{n}"), "GET")).await.unwrap();
                }
            })
        };
        for _ in 0..200 {
            assert!(engine.decide("user", "/a", "GET").unwrap().is_allowed());
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(engine.rules().len(), 21);
    }

    #[tokio::test]
    async fn grouping_cycles_terminate() {
        let (engine, _) = engine().await;
        engine.add_grouping(RoleGrouping::new("a", "b")).await.unwrap();
        engine.add_grouping(RoleGrouping::new("b", "a")).await.unwrap();
        engine.add_rule(PolicyRule::new("b", "/x", "GET")).await.unwrap();
        assert!(engine.decide("a", "/x", "GET").unwrap().is_allowed());
    }

    #[tokio::test]
    async fn remove_revokes() {
        let (engine, _) = engine().await;
        let rule = PolicyRule::new("user", "/users/:id", "PUT");
        engine.add_rule(rule.clone()).await.unwrap();
        assert!(engine.remove_rule(&rule).await.unwrap());
        assert!(!engine.has_rule(&rule));
        assert!(!engine.decide("user", "/users/:id", "PUT").unwrap().is_allowed());
        assert!(!engine.remove_rule(&rule).await.unwrap());
    }

    #[tokio::test]
    async fn reload_picks_up_external_writes() {
        let (engine, store) = engine().await;
        store
            .set
            .lock()
            .unwrap()
            .rules
            .push(PolicyRule::new("anonymous", "/auth/login", "POST"));

        assert!(!engine.decide("anonymous", "/auth/login", "POST").unwrap().is_allowed());
        engine.reload().await.unwrap();
        assert!(engine.decide("anonymous", "/auth/login", "POST").unwrap().is_allowed());
    }

    #[tokio::test]
    async fn store_failure_is_an_error_not_a_deny() {
        let (engine, store) = engine().await;
        store.broken.store(true, Ordering::SeqCst);

        let err = engine.add_rule(PolicyRule::new("x", "y", "z")).await.unwrap_err();
        assert!(matches!(err, PolicyError::Store(_)));
        assert!(matches!(engine.reload().await, Err(PolicyError::Store(_))));
        assert!(!engine.has_rule(&PolicyRule::new("x", "y", "z")));
    }

    fn subject() -> impl Strategy<Value = String> {
        prop_oneof![Just("admin"), Just("user"), Just("editor"), Just("anonymous")].prop_map(String::from)
    }

    fn object() -> impl Strategy<Value = String> {
        prop_oneof![Just("/a"), Just("/b"), Just("*")].prop_map(String::from)
    }

    fn action() -> impl Strategy<Value = String> {
        prop_oneof![Just("GET"), Just("PUT"), Just("*")].prop_map(String::from)
    }

    fn rule() -> impl Strategy<Value = PolicyRule> {
        (subject(), object(), action()).prop_map(|(s, o, a)| PolicyRule::new(s, o, a))
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn adding_a_rule_never_revokes_access(
            rules in proptest::collection::vec(rule(), 0..8),
            groupings in proptest::collection::vec((subject(), subject()), 0..4),
            extra in rule(),
            query in (subject(), prop_oneof![Just("/a"), Just("/b")], prop_oneof![Just("GET"), Just("PUT")]),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async move {
                let (engine, _) = engine().await;
                for r in rules {
                    engine.add_rule(r).await.unwrap();
                }
                for (child, parent) in groupings {
                    engine.add_grouping(RoleGrouping::new(child, parent)).await.unwrap();
                }

                let before = engine.decide(&query.0, query.1, query.2).unwrap();
                engine.add_rule(extra).await.unwrap();
                let after = engine.decide(&query.0, query.1, query.2).unwrap();

                if before.is_allowed() {
                    assert!(after.is_allowed());
                }
            });
        }

        #[test]
        fn child_inherits_parent_rules(
            parent in subject(),
            child in "[a-z]{3,8}",
            obj in prop_oneof![Just("/a"), Just("/b")],
            act in prop_oneof![Just("GET"), Just("PUT")],
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async move {
                let (engine, _) = engine().await;
                engine.add_rule(PolicyRule::new(parent.clone(), obj, act)).await.unwrap();
                engine.add_grouping(RoleGrouping::new(child.clone(), parent)).await.unwrap();
                assert!(engine.decide(&child, obj, act).unwrap().is_allowed());
            });
        }
    }
}
