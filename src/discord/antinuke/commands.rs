// Anti-nuke slash commands: configuration, manual quarantine and the word blacklist.

use crate::core::antinuke::{ActionCategory, CategoryLimit, GuildSecurityConfig, Punishment};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;
use std::time::Duration;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum PunishmentChoice {
    Quarantine,
    Kick,
    Ban,
}

impl From<PunishmentChoice> for Punishment {
    fn from(value: PunishmentChoice) -> Self {
        match value {
            PunishmentChoice::Quarantine => Punishment::Quarantine,
            PunishmentChoice::Kick => Punishment::Kick,
            PunishmentChoice::Ban => Punishment::Ban,
        }
    }
}

/// Spam has its own command, so it is not offered here.
#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum LimitedAction {
    #[name = "Channel delete"]
    ChannelDelete,
    #[name = "Role delete"]
    RoleDelete,
    #[name = "Member kick"]
    MemberKick,
    #[name = "Member ban"]
    MemberBan,
    #[name = "Emoji create"]
    EmojiCreate,
    #[name = "Emoji delete"]
    EmojiDelete,
    #[name = "Server update"]
    GuildUpdate,
}

impl From<LimitedAction> for ActionCategory {
    fn from(value: LimitedAction) -> Self {
        match value {
            LimitedAction::ChannelDelete => ActionCategory::ChannelDelete,
            LimitedAction::RoleDelete => ActionCategory::RoleDelete,
            LimitedAction::MemberKick => ActionCategory::MemberKick,
            LimitedAction::MemberBan => ActionCategory::MemberBan,
            LimitedAction::EmojiCreate => ActionCategory::EmojiCreate,
            LimitedAction::EmojiDelete => ActionCategory::EmojiDelete,
            LimitedAction::GuildUpdate => ActionCategory::GuildUpdate,
        }
    }
}

fn mention_role(id: Option<u64>) -> String {
    id.map(|id| format!("<@&{}>", id))
        .unwrap_or_else(|| "Not set".to_string())
}

fn status_embed(config: &GuildSecurityConfig, quarantined: usize) -> serenity::CreateEmbed {
    let limits = ActionCategory::ALL
        .iter()
        .filter_map(|category| {
            config.policy.limit_for(*category).map(|limit| {
                if limit.max_count == 0 {
                    format!("`{}`: disabled", category)
                } else {
                    format!("`{}`: {} / {}s", category, limit.max_count, limit.window_secs)
                }
            })
        })
        .collect::<Vec<_>>()
        .join("\n");

    serenity::CreateEmbed::default()
        .title("🛡️ Anti-Nuke Status")
        .color(if config.enabled {
            serenity::Color::from_rgb(0, 200, 83)
        } else {
            serenity::Color::RED
        })
        .field(
            "Status",
            if config.enabled { "✅ Enabled" } else { "❌ Disabled" },
            true,
        )
        .field("Punishment", config.policy.default_punishment.as_str(), true)
        .field("Quarantined", quarantined.to_string(), true)
        .field("Quarantine Role", mention_role(config.quarantine_role_id), true)
        .field("Bypass Role", mention_role(config.bypass_role_id), true)
        .field(
            "Log Channel",
            config
                .log_channel_id
                .map(|id| format!("<#{}>", id))
                .unwrap_or_else(|| "Not set".to_string()),
            true,
        )
        .field("Limits", limits, false)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Guild ID: {}",
            config.guild_id
        )))
        .timestamp(serenity::Timestamp::now())
}

/// Anti-nuke protection settings.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    subcommands(
        "status",
        "enable",
        "disable",
        "quarantine_role",
        "bypass_role",
        "log_channel",
        "punishment",
        "limit",
        "spam_limit",
        "backup",
        "backups",
        "inspect"
    )
)]
pub async fn antinuke(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show current anti-nuke configuration.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let antinuke = &ctx.data().antinuke;

    let config = antinuke
        .get_config(guild_id)
        .await?
        .unwrap_or_else(|| GuildSecurityConfig::new(guild_id));
    let quarantined = antinuke.quarantined_members(guild_id).len();

    ctx.send(poise::CreateReply::default().embed(status_embed(&config, quarantined)))
        .await?;
    Ok(())
}

/// Enable anti-nuke protection.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let config = ctx
        .data()
        .antinuke
        .update_config(guild_id, |c| c.enabled = true)
        .await?;

    if config.quarantine_role_id.is_none() {
        ctx.say("✅ Anti-nuke enabled. Set a quarantine role with `/antinuke quarantine_role` so offenders can be quarantined.")
            .await?;
    } else {
        ctx.say("✅ Anti-nuke enabled.").await?;
    }
    Ok(())
}

/// Disable anti-nuke protection.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    ctx.data()
        .antinuke
        .update_config(guild_id, |c| c.enabled = false)
        .await?;
    ctx.say("🛑 Anti-nuke disabled.").await?;
    Ok(())
}

/// Set the role given to quarantined members.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn quarantine_role(
    ctx: Context<'_>,
    #[description = "Role that strips all permissions"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    if role.managed {
        ctx.say("That role is managed by an integration and cannot be assigned.")
            .await?;
        return Ok(());
    }

    let role_id = role.id.get();
    ctx.data()
        .antinuke
        .update_config(guild_id, |c| c.quarantine_role_id = Some(role_id))
        .await?;
    ctx.say(format!("✅ Quarantine role set to <@&{}>.", role_id))
        .await?;
    Ok(())
}

/// Set or clear the role that exempts members from normal violations.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn bypass_role(
    ctx: Context<'_>,
    #[description = "Bypass role (leave empty to clear)"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let role_id = role.map(|r| r.id.get());
    ctx.data()
        .antinuke
        .update_config(guild_id, |c| c.bypass_role_id = role_id)
        .await?;

    match role_id {
        Some(id) => ctx.say(format!("✅ Bypass role set to <@&{}>.", id)).await?,
        None => ctx.say("✅ Bypass role cleared.").await?,
    };
    Ok(())
}

/// Set or clear the channel anti-nuke alerts are posted to.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn log_channel(
    ctx: Context<'_>,
    #[description = "Channel for alerts (leave empty to clear)"] channel: Option<serenity::Channel>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let channel_id = channel.map(|c| c.id().get());
    ctx.data()
        .antinuke
        .update_config(guild_id, |c| c.log_channel_id = channel_id)
        .await?;

    match channel_id {
        Some(id) => ctx.say(format!("✅ Alerts will be posted in <#{}>.", id)).await?,
        None => ctx.say("✅ Alert channel cleared.").await?,
    };
    Ok(())
}

/// Choose what happens to members who trip a limit.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn punishment(
    ctx: Context<'_>,
    #[description = "Punishment"] punishment: PunishmentChoice,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let punishment = Punishment::from(punishment);
    ctx.data()
        .antinuke
        .update_config(guild_id, |c| c.policy.default_punishment = punishment)
        .await?;
    ctx.say(format!("✅ Punishment set to **{}**.", punishment.as_str()))
        .await?;
    Ok(())
}

/// Set how many actions of one kind are allowed within a window.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn limit(
    ctx: Context<'_>,
    #[description = "Action to limit"] action: LimitedAction,
    #[description = "Allowed actions per window (0 disables)"] max_count: u32,
    #[description = "Window length in seconds"]
    #[min = 1]
    window_secs: u64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let category = ActionCategory::from(action);
    ctx.data()
        .antinuke
        .update_config(guild_id, |c| {
            c.policy.limits.insert(
                category,
                CategoryLimit {
                    max_count,
                    window_secs,
                },
            );
        })
        .await?;

    ctx.say(format!(
        "✅ `{}` limited to {} per {} seconds.",
        category, max_count, window_secs
    ))
    .await?;
    Ok(())
}

/// Set how many messages a member may send per minute.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn spam_limit(
    ctx: Context<'_>,
    #[description = "Messages per minute (0 disables)"] max_messages_per_minute: u32,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    ctx.data()
        .antinuke
        .update_config(guild_id, |c| {
            c.policy.spam.max_messages_per_minute = max_messages_per_minute
        })
        .await?;
    ctx.say(format!(
        "✅ Spam limit set to {} messages per minute.",
        max_messages_per_minute
    ))
    .await?;
    Ok(())
}

/// Save a snapshot of this server's anti-nuke settings and quarantines.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn backup(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let backup = ctx.data().antinuke.create_config_backup(guild_id).await?;

    ctx.say(format!(
        "💾 Backup #{} saved ({} quarantined, {} blacklisted words).",
        backup.id,
        backup.data.quarantined.len(),
        backup.data.blacklisted_words.len()
    ))
    .await?;
    Ok(())
}

/// List recent backups of this server's anti-nuke settings.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn backups(
    ctx: Context<'_>,
    #[description = "How many to show (default 10)"]
    #[min = 1]
    #[max = 25]
    limit: Option<u32>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let backups = ctx
        .data()
        .antinuke
        .config_backups(guild_id, limit.unwrap_or(10))
        .await?;

    if backups.is_empty() {
        ctx.say("No backups yet. Create one with `/antinuke backup`.")
            .await?;
        return Ok(());
    }

    let mut embed = serenity::CreateEmbed::new()
        .title("💾 Anti-Nuke Backups")
        .color(0x3498db);
    for backup in &backups {
        embed = embed.field(
            format!("#{}", backup.id),
            format!(
                "<t:{}:f>\nQuarantined: {}\nBlacklisted words: {}",
                backup.created_at.timestamp(),
                backup.data.quarantined.len(),
                backup.data.blacklisted_words.len()
            ),
            true,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show a member's threat level, quarantine state and recent actions.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn inspect(
    ctx: Context<'_>,
    #[description = "Member to inspect"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let antinuke = &ctx.data().antinuke;
    let user_id = user.id.get();

    let activity = antinuke.recent_activity(guild_id, user_id).await?;
    let activity = if activity.is_empty() {
        "None".to_string()
    } else {
        activity
            .iter()
            .map(|(category, count)| format!("`{}`: {}", category.as_str(), count))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("🔎 {}", user.name))
        .field("Threat Level", antinuke.threat_level(guild_id, user_id).to_string(), true)
        .field(
            "Quarantine",
            format!("{:?}", antinuke.quarantine_state(guild_id, user_id)),
            true,
        )
        .field("Recent Actions", activity, false)
        .color(0x3498db)
        .timestamp(serenity::Timestamp::now());

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Quarantine a member, optionally for a limited time.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn quarantine(
    ctx: Context<'_>,
    #[description = "Member to quarantine"] user: serenity::User,
    #[description = "Reason"] reason: String,
    #[description = "How long, e.g. 30m or 2h (default: until released)"] duration: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();

    let duration: Option<Duration> = match duration.as_deref().map(humantime::parse_duration) {
        Some(Ok(d)) => Some(d),
        Some(Err(e)) => {
            ctx.say(format!("❌ Invalid duration: {}", e)).await?;
            return Ok(());
        }
        None => None,
    };

    ctx.defer().await?;
    let outcome = ctx
        .data()
        .antinuke
        .quarantine_member(guild_id, user.id.get(), &reason, duration)
        .await?;

    if outcome.success {
        let until = duration
            .map(|d| format!(" for {}", humantime::format_duration(d)))
            .unwrap_or_default();
        ctx.say(format!("🔒 <@{}> quarantined{}.", user.id, until))
            .await?;
    } else {
        ctx.say(format!("❌ Could not quarantine <@{}>: {}", user.id, outcome.reason))
            .await?;
    }
    Ok(())
}

/// Release a quarantined member and give their roles back.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn release(
    ctx: Context<'_>,
    #[description = "Member to release"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();

    ctx.defer().await?;
    let outcome = ctx
        .data()
        .antinuke
        .release_member(guild_id, user.id.get())
        .await;

    let reply = match (outcome.success, outcome.attempts) {
        (true, 0) => format!("<@{}> is not quarantined.", user.id),
        (true, _) => format!("🔓 <@{}> released ({}).", user.id, outcome.reason),
        (false, _) => format!("❌ Could not release <@{}>: {}", user.id, outcome.reason),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Manage the blacklisted word list.
#[poise::command(
    slash_command,
    owners_only,
    subcommands("blacklist_add", "blacklist_remove", "blacklist_list")
)]
pub async fn blacklist(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Add a word or phrase to the blacklist.
#[poise::command(slash_command, owners_only, rename = "add")]
pub async fn blacklist_add(
    ctx: Context<'_>,
    #[description = "Word or phrase"] word: String,
) -> Result<(), Error> {
    if ctx.data().antinuke.add_blacklisted_word(&word).await? {
        ctx.say(format!("✅ Added `{}` to the blacklist.", word.trim().to_lowercase()))
            .await?;
    } else {
        ctx.say("That word is already blacklisted.").await?;
    }
    Ok(())
}

/// Remove a word or phrase from the blacklist.
#[poise::command(slash_command, owners_only, rename = "remove")]
pub async fn blacklist_remove(
    ctx: Context<'_>,
    #[description = "Word or phrase"] word: String,
) -> Result<(), Error> {
    if ctx.data().antinuke.remove_blacklisted_word(&word).await? {
        ctx.say("✅ Removed from the blacklist.").await?;
    } else {
        ctx.say("That word is not blacklisted.").await?;
    }
    Ok(())
}

/// List blacklisted words.
#[poise::command(slash_command, owners_only, rename = "list")]
pub async fn blacklist_list(ctx: Context<'_>) -> Result<(), Error> {
    let words = ctx.data().antinuke.blacklisted_words().await?;
    let body = if words.is_empty() {
        "The blacklist is empty.".to_string()
    } else {
        words
            .iter()
            .map(|w| format!("• `{}`", w))
            .collect::<Vec<_>>()
            .join("\n")
    };

    ctx.send(poise::CreateReply::default().content(body).ephemeral(true))
        .await?;
    Ok(())
}
