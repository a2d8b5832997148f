use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use rolegate_auth::{
    NewRole, NewUser, RegistrationStore, RegistrationTx, RepoError, RepoResult, Role, RoleName, RoleRepository,
    User, UserRepository,
};
use rolegate_core::{RoleId, UserId};

#[derive(Debug, Clone, Default)]
struct State {
    users: BTreeMap<UserId, User>,
    roles: BTreeMap<RoleId, Role>,
    next_user_id: u64,
    next_role_id: u64,
}

impl State {
    fn live_users(&self) -> impl Iterator<Item = &User> {
        self.users.values().filter(|u| u.is_live())
    }

    fn with_role(&self, user: &User) -> User {
        let mut user = user.clone();
        user.role = self.roles.get(&user.role_id).cloned();
        user
    }

    fn find_by_username(&self, username: &str) -> RepoResult<User> {
        self.live_users()
            .find(|u| u.username == username)
            .map(|u| self.with_role(u))
            .ok_or(RepoError::NotFound)
    }

    fn find_by_username_or_email(&self, username: &str, email: &str) -> RepoResult<User> {
        self.live_users()
            .find(|u| u.username == username || u.email == email)
            .map(|u| self.with_role(u))
            .ok_or(RepoError::NotFound)
    }

    fn find_by_id(&self, id: UserId) -> RepoResult<User> {
        self.users
            .get(&id)
            .filter(|u| u.is_live())
            .map(|u| self.with_role(u))
            .ok_or(RepoError::NotFound)
    }

    fn ensure_unique(&self, username: &str, email: &str, except: Option<UserId>) -> RepoResult<()> {
        let clash = self
            .live_users()
            .filter(|u| Some(u.id) != except)
            .find(|u| u.username == username || u.email == email);
        match clash {
            Some(u) if u.username == username => Err(RepoError::Conflict("username already taken".into())),
            Some(_) => Err(RepoError::Conflict("email already taken".into())),
            None => Ok(()),
        }
    }

    fn create_user(&mut self, user: NewUser) -> RepoResult<User> {
        self.ensure_unique(&user.username, &user.email, None)?;
        if !self.roles.contains_key(&user.role_id) {
            return Err(RepoError::Backend(format!("role {} does not exist", user.role_id)));
        }

        self.next_user_id += 1;
        let now = Utc::now();
        let stored = User {
            id: UserId::new(self.next_user_id),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role_id: user.role_id,
            role: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn find_role_by_name(&self, name: &RoleName) -> RepoResult<Role> {
        self.roles
            .values()
            .find(|r| &r.name == name)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    fn find_role_by_id(&self, id: RoleId) -> RepoResult<Role> {
        self.roles.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    fn create_role(&mut self, role: NewRole) -> RepoResult<Role> {
        if self.find_role_by_name(&role.name).is_ok() {
            return Err(RepoError::Conflict(format!("role {} already exists", role.name)));
        }
        self.next_role_id += 1;
        let now = Utc::now();
        let stored = Role {
            id: RoleId::new(self.next_role_id),
            name: role.name,
            description: role.description,
            created_at: now,
            updated_at: now,
        };
        self.roles.insert(stored.id, stored.clone());
        Ok(stored)
    }
}

/// In-memory users and roles.
///
/// Intended for tests/dev. One async mutex guards all state; a registration
/// holds it from `begin` to `commit`, which makes registrations serializable.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryIdentityStore {
    async fn find_by_username(&self, username: &str) -> RepoResult<User> {
        self.state.lock().await.find_by_username(username)
    }

    async fn find_by_username_or_email(&self, username: &str, email: &str) -> RepoResult<User> {
        self.state.lock().await.find_by_username_or_email(username, email)
    }

    async fn find_all(&self) -> RepoResult<Vec<User>> {
        let state = self.state.lock().await;
        Ok(state.live_users().map(|u| state.with_role(u)).collect())
    }

    async fn find_by_id(&self, id: UserId) -> RepoResult<User> {
        self.state.lock().await.find_by_id(id)
    }

    async fn create(&self, user: NewUser) -> RepoResult<User> {
        self.state.lock().await.create_user(user)
    }

    async fn update(&self, user: &User) -> RepoResult<User> {
        let mut state = self.state.lock().await;
        state.find_by_id(user.id)?;
        state.ensure_unique(&user.username, &user.email, Some(user.id))?;

        let mut stored = user.clone();
        stored.role = None;
        stored.updated_at = Utc::now();
        state.users.insert(stored.id, stored.clone());

        let mut updated = user.clone();
        updated.updated_at = stored.updated_at;
        if updated.role.as_ref().is_some_and(|r| r.id != updated.role_id) {
            updated.role = None;
        }
        Ok(updated)
    }

    async fn delete(&self, user: &User) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&user.id) {
            Some(stored) if stored.is_live() => {
                stored.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(RepoError::NotFound),
        }
    }

    async fn load_role(&self, user: &mut User) -> RepoResult<()> {
        user.role = Some(self.state.lock().await.find_role_by_id(user.role_id)?);
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for InMemoryIdentityStore {
    async fn find_by_name(&self, name: &RoleName) -> RepoResult<Role> {
        self.state.lock().await.find_role_by_name(name)
    }

    async fn find_by_id(&self, id: RoleId) -> RepoResult<Role> {
        self.state.lock().await.find_role_by_id(id)
    }

    async fn create(&self, role: NewRole) -> RepoResult<Role> {
        self.state.lock().await.create_role(role)
    }
}

#[async_trait]
impl RegistrationStore for InMemoryIdentityStore {
    async fn begin(&self) -> RepoResult<Box<dyn RegistrationTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryRegistrationTx { guard, working }))
    }
}

/// Works on a copy of the state; `commit` swaps it in. Dropping discards it.
pub struct InMemoryRegistrationTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl RegistrationTx for InMemoryRegistrationTx {
    async fn find_by_username_or_email(&mut self, username: &str, email: &str) -> RepoResult<User> {
        self.working.find_by_username_or_email(username, email)
    }

    async fn find_role_by_name(&mut self, name: &RoleName) -> RepoResult<Role> {
        self.working.find_role_by_name(name)
    }

    async fn create_role(&mut self, role: NewRole) -> RepoResult<Role> {
        self.working.create_role(role)
    }

    async fn create_user(&mut self, user: NewUser) -> RepoResult<User> {
        self.working.create_user(user)
    }

    async fn load_role(&mut self, user: &mut User) -> RepoResult<()> {
        user.role = Some(self.working.find_role_by_id(user.role_id)?);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> RepoResult<()> {
        let InMemoryRegistrationTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
