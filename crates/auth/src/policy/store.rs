use async_trait::async_trait;

use super::{PolicyError, PolicyRule, RoleGrouping};

/// Result of inserting a rule or grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
}

/// Everything a store holds, as loaded in one read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    pub rules: Vec<PolicyRule>,
    pub groupings: Vec<RoleGrouping>,
}

/// Durable storage for policy rules and role groupings.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load(&self) -> Result<PolicySet, PolicyError>;

    async fn has_rule(&self, rule: &PolicyRule) -> Result<bool, PolicyError>;

    async fn add_rule(&self, rule: &PolicyRule) -> Result<AddOutcome, PolicyError>;

    /// Returns `false` when the rule was not present.
    async fn remove_rule(&self, rule: &PolicyRule) -> Result<bool, PolicyError>;

    async fn has_grouping(&self, grouping: &RoleGrouping) -> Result<bool, PolicyError>;

    async fn add_grouping(&self, grouping: &RoleGrouping) -> Result<AddOutcome, PolicyError>;

    async fn remove_grouping(&self, grouping: &RoleGrouping) -> Result<bool, PolicyError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Default)]
    pub(crate) struct VecStore {
        pub(crate) set: Mutex<PolicySet>,
        pub(crate) broken: AtomicBool,
    }

    impl VecStore {
        fn check(&self) -> Result<(), PolicyError> {
            if self.broken.load(Ordering::SeqCst) {
                Err(PolicyError::Store("backend offline".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl PolicyStore for VecStore {
        async fn load(&self) -> Result<PolicySet, PolicyError> {
            self.check()?;
            Ok(self.set.lock().unwrap().clone())
        }

        async fn has_rule(&self, rule: &PolicyRule) -> Result<bool, PolicyError> {
            Ok(self.set.lock().unwrap().rules.contains(rule))
        }

        async fn add_rule(&self, rule: &PolicyRule) -> Result<AddOutcome, PolicyError> {
            self.check()?;
            let mut set = self.set.lock().unwrap();
            if set.rules.contains(rule) {
                return Ok(AddOutcome::Duplicate);
            }
            set.rules.push(rule.clone());
            Ok(AddOutcome::Added)
        }

        async fn remove_rule(&self, rule: &PolicyRule) -> Result<bool, PolicyError> {
            let mut set = self.set.lock().unwrap();
            let before = set.rules.len();
            set.rules.retain(|r| r != rule);
            Ok(set.rules.len() != before)
        }

        async fn has_grouping(&self, grouping: &RoleGrouping) -> Result<bool, PolicyError> {
            Ok(self.set.lock().unwrap().groupings.contains(grouping))
        }

        async fn add_grouping(&self, grouping: &RoleGrouping) -> Result<AddOutcome, PolicyError> {
            self.check()?;
            let mut set = self.set.lock().unwrap();
            if set.groupings.contains(grouping) {
                return Ok(AddOutcome::Duplicate);
            }
            set.groupings.push(grouping.clone());
            Ok(AddOutcome::Added)
        }

        async fn remove_grouping(&self, grouping: &RoleGrouping) -> Result<bool, PolicyError> {
            let mut set = self.set.lock().unwrap();
            let before = set.groupings.len();
            set.groupings.retain(|g| g != grouping);
            Ok(set.groupings.len() != before)
        }
    }
}
