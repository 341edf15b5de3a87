// Test doubles shared by the anti-nuke tests.

use super::antinuke_models::QuarantineRecord;
use super::antinuke_store::{QuarantineStore, StoreError};
use super::member_roles::{GuildRole, MemberRoleService, MemberSnapshot, RoleApiError};
use super::notifier::{NotificationKind, Notifier, NotifyError};
use super::retry::Sleeper;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct FakeGuild {
    /// role id -> managed
    roles: BTreeMap<u64, bool>,
    members: HashMap<u64, BTreeSet<u64>>,
}

/// In-memory guilds with switchable failure modes.
#[derive(Default)]
pub struct FakeRoleService {
    guilds: Mutex<HashMap<u64, FakeGuild>>,
    /// Next N set_roles calls fail transiently.
    pub failing_set_roles: AtomicU32,
    /// Next N set_roles calls report success but change nothing.
    pub ignored_set_roles: AtomicU32,
    /// Every mutation fails with a permission error.
    pub deny_permissions: AtomicBool,
    /// Every mutation fails transiently.
    pub always_fail: AtomicBool,
    /// Next N mutations never complete.
    pub hanging_mutations: AtomicU32,
    /// Every call never completes.
    pub hang_everything: AtomicBool,
    mutations: Mutex<Vec<String>>,
    kicked: Mutex<Vec<(u64, u64)>>,
    banned: Mutex<Vec<(u64, u64)>>,
}

impl FakeRoleService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_guild_roles(&self, guild_id: u64, role_ids: &[u64]) {
        let mut guilds = self.guilds.lock().unwrap();
        let guild = guilds.entry(guild_id).or_default();
        for id in role_ids {
            guild.roles.insert(*id, false);
        }
    }

    pub fn add_managed_role(&self, guild_id: u64, role_id: u64) {
        let mut guilds = self.guilds.lock().unwrap();
        guilds.entry(guild_id).or_default().roles.insert(role_id, true);
    }

    pub fn add_member(&self, guild_id: u64, user_id: u64, role_ids: &[u64]) {
        let mut guilds = self.guilds.lock().unwrap();
        let guild = guilds.entry(guild_id).or_default();
        for id in role_ids {
            guild.roles.entry(*id).or_insert(false);
        }
        guild
            .members
            .insert(user_id, role_ids.iter().copied().collect());
    }

    pub fn remove_member(&self, guild_id: u64, user_id: u64) {
        if let Some(guild) = self.guilds.lock().unwrap().get_mut(&guild_id) {
            guild.members.remove(&user_id);
        }
    }

    /// Delete a role guild-side, stripping it from every member.
    pub fn delete_guild_role(&self, guild_id: u64, role_id: u64) {
        if let Some(guild) = self.guilds.lock().unwrap().get_mut(&guild_id) {
            guild.roles.remove(&role_id);
            for roles in guild.members.values_mut() {
                roles.remove(&role_id);
            }
        }
    }

    /// Change a member's roles behind the engine's back.
    pub fn force_member_roles(&self, guild_id: u64, user_id: u64, role_ids: &[u64]) {
        if let Some(guild) = self.guilds.lock().unwrap().get_mut(&guild_id) {
            guild
                .members
                .insert(user_id, role_ids.iter().copied().collect());
        }
    }

    pub fn member_roles(&self, guild_id: u64, user_id: u64) -> Option<BTreeSet<u64>> {
        self.guilds
            .lock()
            .unwrap()
            .get(&guild_id)
            .and_then(|g| g.members.get(&user_id).cloned())
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.lock().unwrap().len()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn kicked(&self) -> Vec<(u64, u64)> {
        self.kicked.lock().unwrap().clone()
    }

    pub fn banned(&self) -> Vec<(u64, u64)> {
        self.banned.lock().unwrap().clone()
    }

    fn check_mutation(&self, call: String) -> Result<(), RoleApiError> {
        self.mutations.lock().unwrap().push(call);
        if self.deny_permissions.load(Ordering::SeqCst) {
            return Err(RoleApiError::Permission("missing MANAGE_ROLES".to_string()));
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(RoleApiError::Transient("gateway unavailable".to_string()));
        }
        Ok(())
    }

    async fn stall(&self, mutation: bool) {
        let hang = self.hang_everything.load(Ordering::SeqCst)
            || (mutation && Self::take_one(&self.hanging_mutations));
        if hang {
            std::future::pending::<()>().await;
        }
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn with_member<T>(
        &self,
        guild_id: u64,
        user_id: u64,
        f: impl FnOnce(&BTreeMap<u64, bool>, &mut BTreeSet<u64>) -> T,
    ) -> Result<T, RoleApiError> {
        let mut guilds = self.guilds.lock().unwrap();
        let guild = guilds
            .get_mut(&guild_id)
            .ok_or(RoleApiError::MemberNotFound)?;
        let FakeGuild { roles, members } = guild;
        let member = members
            .get_mut(&user_id)
            .ok_or(RoleApiError::MemberNotFound)?;
        Ok(f(&*roles, member))
    }
}

#[async_trait]
impl MemberRoleService for FakeRoleService {
    async fn fetch_member(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<MemberSnapshot, RoleApiError> {
        self.stall(false).await;
        self.with_member(guild_id, user_id, |_, roles| MemberSnapshot {
            user_id,
            role_ids: roles.clone(),
        })
    }

    async fn guild_roles(&self, guild_id: u64) -> Result<Vec<GuildRole>, RoleApiError> {
        self.stall(false).await;
        let guilds = self.guilds.lock().unwrap();
        Ok(guilds
            .get(&guild_id)
            .map(|g| {
                g.roles
                    .iter()
                    .map(|(id, managed)| GuildRole {
                        id: *id,
                        managed: *managed,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &BTreeSet<u64>,
        _reason: &str,
    ) -> Result<(), RoleApiError> {
        self.stall(true).await;
        self.check_mutation(format!("set {user_id} {role_ids:?}"))?;
        if Self::take_one(&self.failing_set_roles) {
            return Err(RoleApiError::Transient("rate limited".to_string()));
        }
        if Self::take_one(&self.ignored_set_roles) {
            return Ok(());
        }
        self.with_member(guild_id, user_id, |guild_roles, member| {
            // Managed roles survive a replace, as on the real platform.
            let kept_managed: Vec<u64> = member
                .iter()
                .copied()
                .filter(|id| guild_roles.get(id).copied().unwrap_or(false))
                .collect();
            *member = role_ids.clone();
            member.extend(kept_managed);
        })
    }

    async fn add_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &[u64],
        _reason: &str,
    ) -> Result<(), RoleApiError> {
        self.stall(true).await;
        self.check_mutation(format!("add {user_id} {role_ids:?}"))?;
        self.with_member(guild_id, user_id, |_, member| {
            member.extend(role_ids.iter().copied());
        })
    }

    async fn remove_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &[u64],
        _reason: &str,
    ) -> Result<(), RoleApiError> {
        self.stall(true).await;
        self.check_mutation(format!("remove {user_id} {role_ids:?}"))?;
        self.with_member(guild_id, user_id, |guild_roles, member| {
            for id in role_ids {
                if !guild_roles.get(id).copied().unwrap_or(false) {
                    member.remove(id);
                }
            }
        })
    }

    async fn kick_member(
        &self,
        guild_id: u64,
        user_id: u64,
        _reason: &str,
    ) -> Result<(), RoleApiError> {
        self.stall(true).await;
        self.check_mutation(format!("kick {user_id}"))?;
        self.with_member(guild_id, user_id, |_, _| ())?;
        self.remove_member(guild_id, user_id);
        self.kicked.lock().unwrap().push((guild_id, user_id));
        Ok(())
    }

    async fn ban_member(
        &self,
        guild_id: u64,
        user_id: u64,
        _reason: &str,
    ) -> Result<(), RoleApiError> {
        self.stall(true).await;
        self.check_mutation(format!("ban {user_id}"))?;
        self.remove_member(guild_id, user_id);
        self.banned.lock().unwrap().push((guild_id, user_id));
        Ok(())
    }
}

/// Captures notifications; can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(u64, NotificationKind, u64, String)>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().unwrap().iter().map(|n| n.1).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        guild_id: u64,
        kind: NotificationKind,
        user_id: u64,
        details: &str,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((guild_id, kind, user_id, details.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError("log channel missing".to_string()));
        }
        Ok(())
    }
}

/// Returns immediately and remembers what it was asked to wait.
#[derive(Default)]
pub struct InstantSleeper {
    requested: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> Vec<Duration> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, duration: Duration) {
        self.requested.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Quarantine store whose writes always fail.
pub struct FailingQuarantineStore;

#[async_trait]
impl QuarantineStore for FailingQuarantineStore {
    async fn save(&self, _record: &QuarantineRecord) -> Result<(), StoreError> {
        Err(StoreError::Database("disk I/O error".to_string()))
    }

    async fn get(
        &self,
        _user_id: u64,
        _guild_id: u64,
    ) -> Result<Option<QuarantineRecord>, StoreError> {
        Ok(None)
    }

    async fn delete(&self, _user_id: u64, _guild_id: u64) -> Result<(), StoreError> {
        Err(StoreError::Database("disk I/O error".to_string()))
    }

    async fn list_by_guild(&self, _guild_id: u64) -> Result<Vec<QuarantineRecord>, StoreError> {
        Ok(Vec::new())
    }
}
