// Gateway events -> anti-nuke engine.
//
// Destructive moderation actions arrive as audit log entries; the entry's user is
// the actor. Anything the bot did itself is skipped.

use crate::core::antinuke::{
    ActionCategory, EnforcementAction, EnforcementReport, ModerationEvent, ViolationKind,
};
use crate::discord::Data;
use ::serenity::model::guild::audit_log::{
    Action, AuditLogEntry, ChannelAction, EmojiAction, MemberAction, RoleAction,
};
use anyhow::Result;
use chrono::Utc;
use poise::serenity_prelude::{self as serenity, Context};
use std::collections::BTreeSet;

/// Which counter an audit log action feeds, if any.
pub fn category_for(action: &Action) -> Option<ActionCategory> {
    match action {
        Action::Channel(ChannelAction::Delete) => Some(ActionCategory::ChannelDelete),
        Action::Role(RoleAction::Delete) => Some(ActionCategory::RoleDelete),
        Action::Member(MemberAction::Kick) => Some(ActionCategory::MemberKick),
        Action::Member(MemberAction::BanAdd) => Some(ActionCategory::MemberBan),
        Action::Emoji(EmojiAction::Create) => Some(ActionCategory::EmojiCreate),
        Action::Emoji(EmojiAction::Delete) => Some(ActionCategory::EmojiDelete),
        Action::GuildUpdate => Some(ActionCategory::GuildUpdate),
        _ => None,
    }
}

fn log_report(report: &EnforcementReport) {
    let guild_id = report.violation.guild_id;
    let user_id = report.violation.user_id;
    match &report.action {
        EnforcementAction::Suppressed => {
            tracing::info!(guild_id, user_id, kind = %report.violation.kind, "Violation suppressed by bypass")
        }
        EnforcementAction::Quarantined(outcome) if !outcome.success => {
            tracing::error!(guild_id, user_id, "Quarantine failed: {}", outcome.reason)
        }
        EnforcementAction::Failed(reason) => {
            tracing::error!(guild_id, user_id, "Punishment failed: {}", reason)
        }
        action => tracing::info!(guild_id, user_id, ?action, "Violation enforced"),
    }
}

pub async fn handle_audit_log_entry(
    data: &Data,
    entry: &AuditLogEntry,
    guild_id: serenity::GuildId,
) -> Result<()> {
    let Some(category) = category_for(&entry.action) else {
        return Ok(());
    };

    let actor_id = entry.user_id.get();
    if actor_id == data.bot_user_id {
        return Ok(());
    }

    let event = ModerationEvent {
        guild_id: guild_id.get(),
        actor_id,
        category,
        timestamp: Utc::now(),
    };

    if let Some(report) = data.antinuke.handle_event(event).await? {
        log_report(&report);
    }
    Ok(())
}

pub async fn handle_message(ctx: &Context, data: &Data, msg: &serenity::Message) -> Result<()> {
    if msg.author.bot {
        return Ok(());
    }
    let Some(guild_id) = msg.guild_id else {
        return Ok(());
    };

    let reports = data
        .antinuke
        .handle_message(guild_id.get(), msg.author.id.get(), &msg.content, Utc::now())
        .await?;

    for report in &reports {
        log_report(report);

        let blocked = report.violation.kind == ViolationKind::BlacklistedWord
            && report.action != EnforcementAction::Suppressed;
        if blocked {
            if let Err(e) = msg.delete(&ctx.http).await {
                tracing::warn!(guild_id = guild_id.get(), "Failed to delete blacklisted message: {}", e);
            }
        }
    }
    Ok(())
}

pub async fn handle_member_join(data: &Data, member: &serenity::Member) -> Result<()> {
    if member.user.id.get() == data.bot_user_id {
        return Ok(());
    }

    if let Some(report) = data
        .antinuke
        .handle_member_join(member.guild_id.get(), member.user.id.get(), &member.user.name)
        .await?
    {
        log_report(&report);
    }
    Ok(())
}

pub async fn handle_member_remove(
    data: &Data,
    guild_id: serenity::GuildId,
    user: &serenity::User,
    member_data: Option<&serenity::Member>,
) -> Result<()> {
    let Some(member) = member_data else {
        tracing::debug!(guild_id = guild_id.get(), user_id = user.id.get(), "No cached roles for departing member");
        return Ok(());
    };

    let role_ids: Vec<u64> = member.roles.iter().map(|r| r.get()).collect();
    data.antinuke
        .handle_member_leave(guild_id.get(), user.id.get(), &role_ids)
        .await?;
    Ok(())
}

pub async fn handle_member_update(
    data: &Data,
    event: &serenity::GuildMemberUpdateEvent,
) -> Result<()> {
    let role_ids: BTreeSet<u64> = event.roles.iter().map(|r| r.get()).collect();

    if let Some(outcome) = data
        .antinuke
        .handle_member_update(event.guild_id.get(), event.user.id.get(), &role_ids)
        .await
    {
        tracing::info!(
            guild_id = event.guild_id.get(),
            user_id = event.user.id.get(),
            success = outcome.success,
            "Quarantine drift handled: {}",
            outcome.reason
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destructive_actions_map_to_categories() {
        assert_eq!(
            category_for(&Action::Channel(ChannelAction::Delete)),
            Some(ActionCategory::ChannelDelete)
        );
        assert_eq!(
            category_for(&Action::Member(MemberAction::BanAdd)),
            Some(ActionCategory::MemberBan)
        );
        assert_eq!(
            category_for(&Action::Emoji(EmojiAction::Create)),
            Some(ActionCategory::EmojiCreate)
        );
        assert_eq!(category_for(&Action::GuildUpdate), Some(ActionCategory::GuildUpdate));
    }

    #[test]
    fn test_harmless_actions_are_ignored() {
        assert_eq!(category_for(&Action::Channel(ChannelAction::Create)), None);
        assert_eq!(category_for(&Action::Role(RoleAction::Update)), None);
        assert_eq!(category_for(&Action::Member(MemberAction::BanRemove)), None);
    }
}
