// This is the entry point of the anti-nuke bot.
//
// **Architecture Overview:**
// - `core/` = Detection, punishment and quarantine logic (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite, in-memory)
// - `discord/` = Discord-specific adapters (commands, events, role API)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::antinuke::{
    AntiNukeDeps, AntiNukeService, QuarantineSettings, TierPolicy, TokioSleeper,
};
use crate::discord::antinuke::events as antinuke_events;
use crate::discord::antinuke::{LogChannelNotifier, SerenityRoleService};
use crate::discord::{Data, Error};
use crate::infra::antinuke::SqliteAntiNukeStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// Read a numeric setting, falling back to `default` when unset or malformed.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value {:?} for {}", raw, key);
            default
        }),
        Err(_) => default,
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}

fn quarantine_settings_from_env() -> QuarantineSettings {
    let defaults = QuarantineSettings::default();
    QuarantineSettings {
        max_attempts: env_or("ANTINUKE_MAX_ATTEMPTS", defaults.max_attempts).max(1),
        backoff_base: env_millis("ANTINUKE_BACKOFF_BASE_MS", defaults.backoff_base),
        role_call_timeout: env_millis("ANTINUKE_ROLE_CALL_TIMEOUT_MS", defaults.role_call_timeout),
        release_verify_attempts: env_or(
            "ANTINUKE_RELEASE_VERIFY_ATTEMPTS",
            defaults.release_verify_attempts,
        )
        .max(1),
        release_verify_delay: env_millis(
            "ANTINUKE_RELEASE_VERIFY_DELAY_MS",
            defaults.release_verify_delay,
        ),
        release_step_delay: env_millis("ANTINUKE_RELEASE_STEP_DELAY_MS", defaults.release_step_delay),
    }
}

fn tier_policy_from_env() -> TierPolicy {
    let Ok(path) = std::env::var("ANTINUKE_TIER_POLICY_FILE") else {
        return TierPolicy::default();
    };

    match std::fs::read_to_string(&path).map_err(|e| e.to_string()).and_then(|json| {
        TierPolicy::from_json(&json).map_err(|e| e.to_string())
    }) {
        Ok(policy) => {
            tracing::info!("Loaded violation tiers from {}", path);
            policy
        }
        Err(e) => {
            tracing::warn!("Failed to load tier policy from {}: {}. Using defaults.", path, e);
            TierPolicy::default()
        }
    }
}

/// Event handler for non-command Discord events.
/// Audit log entries, messages and membership changes all feed the anti-nuke engine.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::GuildAuditLogEntryCreate { entry, guild_id } => {
            if let Err(e) = antinuke_events::handle_audit_log_entry(data, entry, *guild_id).await {
                tracing::error!("Error handling audit log entry: {}", e);
            }
        }
        serenity::FullEvent::Message { new_message } => {
            if let Err(e) = antinuke_events::handle_message(ctx, data, new_message).await {
                tracing::error!("Error scanning message: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = antinuke_events::handle_member_join(data, new_member).await {
                tracing::error!("Error handling member join: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberRemoval {
            guild_id,
            user,
            member_data_if_available,
        } => {
            if let Err(e) = antinuke_events::handle_member_remove(
                data,
                *guild_id,
                user,
                member_data_if_available.as_ref(),
            )
            .await
            {
                tracing::error!("Error handling member remove: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberUpdate { event, .. } => {
            if let Err(e) = antinuke_events::handle_member_update(data, event).await {
                tracing::error!("Error handling member update: {}", e);
            }
        }

        _ => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Get Discord bot token from environment
    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let data_dir = std::env::var("ANTINUKE_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    std::fs::create_dir_all(&data_dir).expect("Failed to create data directory for SQLite files");
    let antinuke_db_path = format!("{}/antinuke.db", data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Stores are created here; the role service and notifier need the HTTP
    // client, so the engine itself is wired up in `setup`.

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", antinuke_db_path))
        .await
        .expect("Failed to connect to anti-nuke DB");
    let store = SqliteAntiNukeStore::new(pool);
    store
        .migrate()
        .await
        .expect("Failed to migrate anti-nuke DB");
    let store = Arc::new(store);

    let settings = quarantine_settings_from_env();
    let tiers = tier_policy_from_env();
    tracing::info!(?settings, "Quarantine settings loaded");

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MODERATION // Audit log entries
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT; // Required to read message content

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            // Register all our commands here
            commands: vec![
                discord::antinuke::commands::antinuke(),
                discord::antinuke::commands::quarantine(),
                discord::antinuke::commands::release(),
                discord::antinuke::commands::blacklist(),
            ],
            // Event handler for audit log, message and member events
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                tracing::info!("🤖 Bot is starting up as {}", ready.user.name);

                let antinuke = Arc::new(AntiNukeService::new(
                    AntiNukeDeps {
                        roles: Arc::new(SerenityRoleService::new(ctx.http.clone())),
                        configs: store.clone(),
                        quarantines: store.clone(),
                        backups: store.clone(),
                        config_backups: store.clone(),
                        notifier: Arc::new(LogChannelNotifier::new(
                            ctx.http.clone(),
                            store.clone(),
                        )),
                        sleeper: Arc::new(TokioSleeper),
                    },
                    tiers,
                    settings,
                ));

                // Re-arm release timers for members quarantined before the restart.
                match antinuke.restore_state().await {
                    Ok(count) => tracing::info!("Restored {} quarantine records", count),
                    Err(e) => tracing::warn!("Failed to restore quarantine records: {}", e),
                }

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("✅ Commands registered!");

                Ok(Data {
                    antinuke,
                    bot_user_id: ready.user.id.get(),
                })
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
