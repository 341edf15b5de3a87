// Role backup - remembers a member's roles when they leave and gives them back on rejoin.
//
// Leaving and rejoining is a common way to shed a quarantine, so the snapshot is
// taken as-is: a quarantined member comes back with only the quarantine role.

use super::antinuke_models::RoleBackupSnapshot;
use super::antinuke_store::{RoleBackupStore, StoreError};
use super::member_roles::{bounded_call, MemberRoleService, RoleApiError};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoleBackupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    RoleApi(#[from] RoleApiError),
}

pub struct RoleBackupService {
    roles: Arc<dyn MemberRoleService>,
    store: Arc<dyn RoleBackupStore>,
    role_call_timeout: Duration,
}

impl RoleBackupService {
    pub fn new(
        roles: Arc<dyn MemberRoleService>,
        store: Arc<dyn RoleBackupStore>,
        role_call_timeout: Duration,
    ) -> Self {
        Self {
            roles,
            store,
            role_call_timeout,
        }
    }

    /// Snapshot the roles of a departing member. Returns how many roles were saved.
    ///
    /// The everyone role and managed roles are never saved. If the guild's role
    /// list cannot be read, only the everyone role is filtered. The snapshot always
    /// replaces the previous one, even when it is empty.
    pub async fn on_member_leave(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &[u64],
    ) -> Result<usize, RoleBackupError> {
        let managed: BTreeSet<u64> = match bounded_call(self.role_call_timeout, self.roles.guild_roles(guild_id)).await {
            Ok(roles) => roles.into_iter().filter(|r| r.managed).map(|r| r.id).collect(),
            Err(e) => {
                tracing::warn!(guild_id, "Could not list guild roles for backup: {}", e);
                BTreeSet::new()
            }
        };

        let saved: BTreeSet<u64> = role_ids
            .iter()
            .copied()
            .filter(|id| *id != guild_id && !managed.contains(id))
            .collect();

        let snapshot = RoleBackupSnapshot {
            user_id,
            guild_id,
            role_ids: saved,
            timestamp: Utc::now(),
        };
        self.store.save_backup(&snapshot).await?;

        tracing::debug!(guild_id, user_id, roles = snapshot.role_ids.len(), "Saved role backup");
        Ok(snapshot.role_ids.len())
    }

    /// Give a rejoining member their saved roles back. Returns the roles actually
    /// restored; roles deleted while they were gone are skipped.
    ///
    /// The snapshot is consumed even if nothing could be restored.
    pub async fn on_member_join(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<Option<Vec<u64>>, RoleBackupError> {
        let Some(snapshot) = self.store.take_backup(user_id, guild_id).await? else {
            return Ok(None);
        };

        let guild_roles = bounded_call(self.role_call_timeout, self.roles.guild_roles(guild_id)).await?;
        let restorable: Vec<u64> = snapshot
            .role_ids
            .iter()
            .copied()
            .filter(|id| guild_roles.iter().any(|r| r.id == *id && !r.managed))
            .collect();

        if restorable.is_empty() {
            return Ok(Some(Vec::new()));
        }

        bounded_call(
            self.role_call_timeout,
            self.roles
                .add_roles(guild_id, user_id, &restorable, "Restoring roles from backup"),
        )
        .await?;

        tracing::info!(
            guild_id,
            user_id,
            restored = restorable.len(),
            skipped = snapshot.role_ids.len() - restorable.len(),
            "Restored roles on rejoin"
        );
        Ok(Some(restorable))
    }
}
