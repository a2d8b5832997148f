use std::sync::RwLock;

use async_trait::async_trait;

use rolegate_auth::{AddOutcome, PolicyError, PolicyRule, PolicySet, PolicyStore, RoleGrouping};

/// In-memory policy store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    inner: RwLock<PolicySet>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, PolicySet>, PolicyError> {
        self.inner
            .read()
            .map_err(|_| PolicyError::Store("policy store lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, PolicySet>, PolicyError> {
        self.inner
            .write()
            .map_err(|_| PolicyError::Store("policy store lock poisoned".into()))
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn load(&self) -> Result<PolicySet, PolicyError> {
        Ok(self.read()?.clone())
    }

    async fn has_rule(&self, rule: &PolicyRule) -> Result<bool, PolicyError> {
        Ok(self.read()?.rules.contains(rule))
    }

    async fn add_rule(&self, rule: &PolicyRule) -> Result<AddOutcome, PolicyError> {
        let mut set = self.write()?;
        if set.rules.contains(rule) {
            return Ok(AddOutcome::Duplicate);
        }
        set.rules.push(rule.clone());
        Ok(AddOutcome::Added)
    }

    async fn remove_rule(&self, rule: &PolicyRule) -> Result<bool, PolicyError> {
        let mut set = self.write()?;
        let before = set.rules.len();
        set.rules.retain(|r| r != rule);
        Ok(set.rules.len() != before)
    }

    async fn has_grouping(&self, grouping: &RoleGrouping) -> Result<bool, PolicyError> {
        Ok(self.read()?.groupings.contains(grouping))
    }

    async fn add_grouping(&self, grouping: &RoleGrouping) -> Result<AddOutcome, PolicyError> {
        let mut set = self.write()?;
        if set.groupings.contains(grouping) {
            return Ok(AddOutcome::Duplicate);
        }
        set.groupings.push(grouping.clone());
        Ok(AddOutcome::Added)
    }

    async fn remove_grouping(&self, grouping: &RoleGrouping) -> Result<bool, PolicyError> {
        let mut set = self.write()?;
        let before = set.groupings.len();
        set.groupings.retain(|g| g != grouping);
        Ok(set.groupings.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_idempotent() {
        let store = InMemoryPolicyStore::new();
        let rule = PolicyRule::new("user", "/users/:id", "GET");
        assert_eq!(store.add_rule(&rule).await.unwrap(), AddOutcome::Added);
        assert_eq!(store.add_rule(&rule).await.unwrap(), AddOutcome::Duplicate);
        assert!(store.has_rule(&rule).await.unwrap());
        assert_eq!(store.load().await.unwrap().rules.len(), 1);
    }

    #[tokio::test]
    async fn groupings_are_separate_from_rules() {
        let store = InMemoryPolicyStore::new();
        let g = RoleGrouping::new("editor", "user");
        store.add_grouping(&g).await.unwrap();
        assert!(store.has_grouping(&g).await.unwrap());
        assert!(store.load().await.unwrap().rules.is_empty());
        assert!(store.remove_grouping(&g).await.unwrap());
        assert!(!store.remove_grouping(&g).await.unwrap());
    }
}
