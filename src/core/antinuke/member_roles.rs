// Member Role Service port.
//
// The core decides WHAT a member's roles should be; implementations of this trait
// (Discord HTTP in production, a fake in tests) decide HOW to get there.
// Every call is network I/O and may fail transiently or for lack of permission.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleApiError {
    /// Network failure or rate limit. Worth retrying.
    #[error("Transient role API error: {0}")]
    Transient(String),

    /// The bot lacks rank or permission to touch this member.
    #[error("Missing permission: {0}")]
    Permission(String),

    /// The member is no longer in the guild.
    #[error("Member not found")]
    MemberNotFound,

    #[error("Role API call timed out after {0:?}")]
    Timeout(Duration),
}

impl RoleApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RoleApiError::Transient(_) | RoleApiError::Timeout(_))
    }
}

/// Run one role API call, giving up with `RoleApiError::Timeout` after `limit`.
pub async fn bounded_call<T>(
    limit: Duration,
    request: impl Future<Output = Result<T, RoleApiError>>,
) -> Result<T, RoleApiError> {
    tokio::time::timeout(limit, request)
        .await
        .unwrap_or(Err(RoleApiError::Timeout(limit)))
}

/// Current role membership of one guild member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSnapshot {
    pub user_id: u64,
    pub role_ids: BTreeSet<u64>,
}

/// A role as the guild currently defines it.
#[derive(Debug, Clone, PartialEq)]
pub struct GuildRole {
    pub id: u64,
    /// Integration/booster roles; the platform refuses to assign or remove these.
    pub managed: bool,
}

#[async_trait]
pub trait MemberRoleService: Send + Sync {
    async fn fetch_member(&self, guild_id: u64, user_id: u64)
        -> Result<MemberSnapshot, RoleApiError>;

    async fn guild_roles(&self, guild_id: u64) -> Result<Vec<GuildRole>, RoleApiError>;

    /// Replace the member's role set in one call.
    async fn set_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &BTreeSet<u64>,
        reason: &str,
    ) -> Result<(), RoleApiError>;

    async fn add_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &[u64],
        reason: &str,
    ) -> Result<(), RoleApiError>;

    async fn remove_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &[u64],
        reason: &str,
    ) -> Result<(), RoleApiError>;

    async fn kick_member(&self, guild_id: u64, user_id: u64, reason: &str)
        -> Result<(), RoleApiError>;

    async fn ban_member(&self, guild_id: u64, user_id: u64, reason: &str)
        -> Result<(), RoleApiError>;
}
