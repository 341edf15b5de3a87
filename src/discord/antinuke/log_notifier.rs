// Notifier that posts anti-nuke events to the guild's configured log channel.

use crate::core::antinuke::{GuildConfigStore, NotificationKind, Notifier, NotifyError};
use async_trait::async_trait;
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter};
use std::sync::Arc;

pub struct LogChannelNotifier {
    http: Arc<serenity::Http>,
    configs: Arc<dyn GuildConfigStore>,
}

impl LogChannelNotifier {
    pub fn new(http: Arc<serenity::Http>, configs: Arc<dyn GuildConfigStore>) -> Self {
        Self { http, configs }
    }
}

pub fn format_notification(
    guild_id: u64,
    kind: NotificationKind,
    user_id: u64,
    details: &str,
) -> CreateEmbed {
    let color = match kind {
        NotificationKind::Released | NotificationKind::RolesRestored => {
            serenity::Color::from_rgb(0, 200, 83)
        }
        NotificationKind::Bypassed | NotificationKind::DriftCorrected => {
            serenity::Color::from_rgb(255, 165, 0)
        }
        _ if kind.is_alert() => serenity::Color::RED,
        _ => serenity::Color::from_rgb(230, 81, 0),
    };

    CreateEmbed::default()
        .title(format!("🛡️ {}", kind.title()))
        .color(color)
        .field("Member", format!("<@{}>", user_id), true)
        .field("Details", details, false)
        .footer(CreateEmbedFooter::new(format!("Guild ID: {}", guild_id)))
        .timestamp(serenity::Timestamp::now())
}

#[async_trait]
impl Notifier for LogChannelNotifier {
    async fn notify(
        &self,
        guild_id: u64,
        kind: NotificationKind,
        user_id: u64,
        details: &str,
    ) -> Result<(), NotifyError> {
        let channel_id = self
            .configs
            .get_config(guild_id)
            .await
            .map_err(|e| NotifyError(e.to_string()))?
            .and_then(|c| c.log_channel_id);

        let Some(channel_id) = channel_id else {
            tracing::info!(guild_id, user_id, ?kind, "{}: {}", kind.title(), details);
            return Ok(());
        };

        let embed = format_notification(guild_id, kind, user_id, details);
        serenity::ChannelId::new(channel_id)
            .send_message(&self.http, serenity::CreateMessage::new().embed(embed))
            .await
            .map_err(|e| NotifyError(e.to_string()))?;
        Ok(())
    }
}
