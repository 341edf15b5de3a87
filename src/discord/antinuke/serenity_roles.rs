// Member Role Service backed by the Discord HTTP API.

use crate::core::antinuke::{GuildRole, MemberRoleService, MemberSnapshot, RoleApiError};
use ::serenity::http::HttpError;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::collections::BTreeSet;
use std::sync::Arc;

// Discord JSON error codes
const UNKNOWN_MEMBER: isize = 10007;
const UNKNOWN_USER: isize = 10013;

/// Ban without deleting any message history.
const BAN_DELETE_MESSAGE_DAYS: u8 = 0;

pub struct SerenityRoleService {
    http: Arc<serenity::Http>,
}

impl SerenityRoleService {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

fn map_error(e: serenity::Error) -> RoleApiError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &e {
        return match (response.status_code.as_u16(), response.error.code) {
            (403, _) => RoleApiError::Permission(response.error.message.clone()),
            (404, UNKNOWN_MEMBER | UNKNOWN_USER) => RoleApiError::MemberNotFound,
            _ => RoleApiError::Transient(e.to_string()),
        };
    }
    RoleApiError::Transient(e.to_string())
}

#[async_trait]
impl MemberRoleService for SerenityRoleService {
    async fn fetch_member(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<MemberSnapshot, RoleApiError> {
        let member = self
            .http
            .get_member(serenity::GuildId::new(guild_id), serenity::UserId::new(user_id))
            .await
            .map_err(map_error)?;

        Ok(MemberSnapshot {
            user_id,
            role_ids: member.roles.iter().map(|r| r.get()).collect(),
        })
    }

    async fn guild_roles(&self, guild_id: u64) -> Result<Vec<GuildRole>, RoleApiError> {
        let roles = self
            .http
            .get_guild_roles(serenity::GuildId::new(guild_id))
            .await
            .map_err(map_error)?;

        Ok(roles
            .iter()
            .map(|role| GuildRole {
                id: role.id.get(),
                managed: role.managed,
            })
            .collect())
    }

    async fn set_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &BTreeSet<u64>,
        reason: &str,
    ) -> Result<(), RoleApiError> {
        // The API rejects edits that drop integration roles, so carry them over.
        let managed: BTreeSet<u64> = self
            .guild_roles(guild_id)
            .await?
            .into_iter()
            .filter(|r| r.managed)
            .map(|r| r.id)
            .collect();
        let current = self.fetch_member(guild_id, user_id).await?;

        let roles: Vec<serenity::RoleId> = role_ids
            .iter()
            .chain(current.role_ids.intersection(&managed))
            .map(|id| serenity::RoleId::new(*id))
            .collect();

        serenity::GuildId::new(guild_id)
            .edit_member(
                &self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .roles(roles)
                    .audit_log_reason(reason),
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn add_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &[u64],
        reason: &str,
    ) -> Result<(), RoleApiError> {
        for role_id in role_ids {
            self.http
                .add_member_role(
                    serenity::GuildId::new(guild_id),
                    serenity::UserId::new(user_id),
                    serenity::RoleId::new(*role_id),
                    Some(reason),
                )
                .await
                .map_err(map_error)?;
        }
        Ok(())
    }

    async fn remove_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &[u64],
        reason: &str,
    ) -> Result<(), RoleApiError> {
        for role_id in role_ids {
            self.http
                .remove_member_role(
                    serenity::GuildId::new(guild_id),
                    serenity::UserId::new(user_id),
                    serenity::RoleId::new(*role_id),
                    Some(reason),
                )
                .await
                .map_err(map_error)?;
        }
        Ok(())
    }

    async fn kick_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), RoleApiError> {
        self.http
            .kick_member(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                Some(reason),
            )
            .await
            .map_err(map_error)
    }

    async fn ban_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), RoleApiError> {
        self.http
            .ban_user(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                BAN_DELETE_MESSAGE_DAYS,
                Some(reason),
            )
            .await
            .map_err(map_error)
    }
}
