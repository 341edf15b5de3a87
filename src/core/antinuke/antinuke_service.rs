// Anti-nuke service - the pipeline from platform events to punishments.
//
// event -> ledger/evaluator -> violation -> bypass arbiter -> punishment.
// Guild configuration is read on every call, so config changes apply immediately.

use super::antinuke_models::{
    ActionCategory, ConfigBackup, ConfigBackupData, EnforcementAction, EnforcementReport,
    GuildSecurityConfig, ModerationEvent, Punishment, QuarantineOutcome, QuarantineRecord,
    QuarantineState, Violation, ViolationKind,
};
use super::antinuke_store::{
    ConfigBackupStore, GuildConfigStore, QuarantineStore, RoleBackupStore, StoreError,
};
use super::bypass_arbiter::{BypassArbiter, TierPolicy};
use super::member_roles::{bounded_call, MemberRoleService, RoleApiError};
use super::notifier::{NotificationKind, Notifier};
use super::policy_evaluator::PolicyEvaluator;
use super::quarantine_controller::{
    QuarantineController, QuarantineRequest, QuarantineSettings, ReleaseTrigger,
};
use super::retry::Sleeper;
use super::role_backup::{RoleBackupError, RoleBackupService};
use super::threat_ledger::ThreatLedger;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum AntiNukeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    RoleApi(#[from] RoleApiError),

    #[error("No {0} is configured for this server")]
    NotConfigured(&'static str),
}

impl From<RoleBackupError> for AntiNukeError {
    fn from(e: RoleBackupError) -> Self {
        match e {
            RoleBackupError::Store(e) => AntiNukeError::Store(e),
            RoleBackupError::RoleApi(e) => AntiNukeError::RoleApi(e),
        }
    }
}

/// Collaborators the engine is built from.
pub struct AntiNukeDeps {
    pub roles: Arc<dyn MemberRoleService>,
    pub configs: Arc<dyn GuildConfigStore>,
    pub quarantines: Arc<dyn QuarantineStore>,
    pub backups: Arc<dyn RoleBackupStore>,
    pub config_backups: Arc<dyn ConfigBackupStore>,
    pub notifier: Arc<dyn Notifier>,
    pub sleeper: Arc<dyn Sleeper>,
}

pub struct AntiNukeService {
    configs: Arc<dyn GuildConfigStore>,
    config_backups: Arc<dyn ConfigBackupStore>,
    roles: Arc<dyn MemberRoleService>,
    notifier: Arc<dyn Notifier>,
    ledger: Arc<ThreatLedger>,
    evaluator: PolicyEvaluator,
    arbiter: BypassArbiter,
    controller: Arc<QuarantineController>,
    role_backup: RoleBackupService,
    role_call_timeout: Duration,
}

impl AntiNukeService {
    pub fn new(deps: AntiNukeDeps, tiers: TierPolicy, settings: QuarantineSettings) -> Self {
        let ledger = Arc::new(ThreatLedger::new());
        let role_call_timeout = settings.role_call_timeout;

        let controller = Arc::new(QuarantineController::new(
            Arc::clone(&deps.roles),
            deps.quarantines,
            Arc::clone(&deps.notifier),
            deps.sleeper,
            Arc::clone(&ledger),
            settings,
        ));

        Self {
            evaluator: PolicyEvaluator::new(Arc::clone(&ledger)),
            arbiter: BypassArbiter::new(Arc::clone(&deps.roles), tiers, role_call_timeout),
            role_backup: RoleBackupService::new(Arc::clone(&deps.roles), deps.backups, role_call_timeout),
            controller,
            ledger,
            configs: deps.configs,
            config_backups: deps.config_backups,
            roles: deps.roles,
            notifier: deps.notifier,
            role_call_timeout,
        }
    }

    // ------------------------------------------------------------------------
    // Detection
    // ------------------------------------------------------------------------

    /// Feed one moderation action into the ledger and punish on a threshold crossing.
    pub async fn handle_event(
        &self,
        event: ModerationEvent,
    ) -> Result<Option<EnforcementReport>, AntiNukeError> {
        let Some(config) = self.active_config(event.guild_id).await? else {
            return Ok(None);
        };

        match self.evaluator.evaluate(&event, &config.policy) {
            Some(violation) => Ok(Some(self.enforce_violation(&config, violation).await)),
            None => Ok(None),
        }
    }

    /// Content-policy violations are critical and skip the counters.
    pub async fn handle_content(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ViolationKind,
        detail: &str,
    ) -> Result<Option<EnforcementReport>, AntiNukeError> {
        let Some(config) = self.active_config(guild_id).await? else {
            return Ok(None);
        };

        let violation = self
            .evaluator
            .content_violation(guild_id, user_id, kind, detail);
        Ok(Some(self.enforce_violation(&config, violation).await))
    }

    /// A posted message counts towards spam and is checked against the blacklist.
    pub async fn handle_message(
        &self,
        guild_id: u64,
        user_id: u64,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<EnforcementReport>, AntiNukeError> {
        let mut reports = Vec::new();

        let event = ModerationEvent {
            guild_id,
            actor_id: user_id,
            category: ActionCategory::MessageSpam,
            timestamp,
        };
        if let Some(report) = self.handle_event(event).await? {
            reports.push(report);
        }

        if let Some(word) = self.classify_text(content).await? {
            let detail = format!("message contained blacklisted word \"{word}\"");
            if let Some(report) = self
                .handle_content(guild_id, user_id, ViolationKind::BlacklistedWord, &detail)
                .await?
            {
                reports.push(report);
            }
        }

        Ok(reports)
    }

    async fn enforce_violation(
        &self,
        config: &GuildSecurityConfig,
        violation: Violation,
    ) -> EnforcementReport {
        let decision = self.arbiter.decide(&violation, config.bypass_role_id).await;
        let guild_id = violation.guild_id;
        let user_id = violation.user_id;

        if decision.suppress {
            let details = format!("{}: {}", violation.kind, violation.detail);
            self.notify(guild_id, NotificationKind::Bypassed, user_id, &details)
                .await;
            return EnforcementReport {
                violation,
                decision,
                action: EnforcementAction::Suppressed,
            };
        }

        if let Some(reason) = &decision.override_reason {
            tracing::info!(guild_id, user_id, kind = %violation.kind, "Bypass holder punished: {}", reason);
        }

        let reason = format!("{}: {}", violation.kind, violation.detail);
        let action = match config.policy.default_punishment {
            Punishment::Quarantine => match config.quarantine_role_id {
                Some(quarantine_role_id) => {
                    let outcome = self
                        .controller
                        .quarantine(QuarantineRequest {
                            guild_id,
                            user_id,
                            quarantine_role_id,
                            reason,
                            duration: None,
                        })
                        .await;
                    EnforcementAction::Quarantined(outcome)
                }
                None => {
                    tracing::warn!(guild_id, user_id, "Cannot quarantine: no quarantine role configured");
                    let failure = "no quarantine role configured".to_string();
                    self.notify(guild_id, NotificationKind::PunishmentFailed, user_id, &failure)
                        .await;
                    EnforcementAction::Failed(failure)
                }
            },
            Punishment::Kick => {
                let result = self
                    .with_timeout(self.roles.kick_member(guild_id, user_id, &reason))
                    .await;
                self.finish_punishment(guild_id, user_id, "kicked", &reason, result, EnforcementAction::Kicked)
                    .await
            }
            Punishment::Ban => {
                let result = self
                    .with_timeout(self.roles.ban_member(guild_id, user_id, &reason))
                    .await;
                self.finish_punishment(guild_id, user_id, "banned", &reason, result, EnforcementAction::Banned)
                    .await
            }
        };

        EnforcementReport {
            violation,
            decision,
            action,
        }
    }

    // No fallback to another punishment on failure; escalation is the operator's call.
    async fn finish_punishment(
        &self,
        guild_id: u64,
        user_id: u64,
        verb: &str,
        reason: &str,
        result: Result<(), RoleApiError>,
        applied: EnforcementAction,
    ) -> EnforcementAction {
        match result {
            Ok(()) => {
                tracing::info!(guild_id, user_id, "Member {}", verb);
                let details = format!("{verb}: {reason}");
                self.notify(guild_id, NotificationKind::PunishmentApplied, user_id, &details)
                    .await;
                applied
            }
            Err(e) => {
                tracing::error!(guild_id, user_id, "Member could not be {}: {}", verb, e);
                let details = format!("could not be {verb}: {e}");
                self.notify(guild_id, NotificationKind::PunishmentFailed, user_id, &details)
                    .await;
                EnforcementAction::Failed(e.to_string())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Manual actions
    // ------------------------------------------------------------------------

    pub async fn quarantine_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
        duration: Option<Duration>,
    ) -> Result<QuarantineOutcome, AntiNukeError> {
        let quarantine_role_id = self
            .configs
            .get_config(guild_id)
            .await?
            .and_then(|c| c.quarantine_role_id)
            .ok_or(AntiNukeError::NotConfigured("quarantine role"))?;

        Ok(self
            .controller
            .quarantine(QuarantineRequest {
                guild_id,
                user_id,
                quarantine_role_id,
                reason: reason.to_string(),
                duration,
            })
            .await)
    }

    pub async fn release_member(&self, guild_id: u64, user_id: u64) -> QuarantineOutcome {
        self.controller
            .release(guild_id, user_id, ReleaseTrigger::Manual)
            .await
    }

    pub fn quarantine_state(&self, guild_id: u64, user_id: u64) -> QuarantineState {
        self.controller.state(guild_id, user_id)
    }

    pub fn quarantined_members(&self, guild_id: u64) -> Vec<QuarantineRecord> {
        self.controller.records_for_guild(guild_id)
    }

    pub fn threat_level(&self, guild_id: u64, user_id: u64) -> u32 {
        self.ledger.threat_level(guild_id, user_id)
    }

    /// Actions per category still inside that category's window. Zero counts are left out.
    pub async fn recent_activity(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<Vec<(ActionCategory, usize)>, AntiNukeError> {
        let policy = self
            .configs
            .get_config(guild_id)
            .await?
            .map(|c| c.policy)
            .unwrap_or_default();
        let now = Utc::now();

        Ok(ActionCategory::ALL
            .into_iter()
            .filter_map(|category| {
                let limit = policy.limit_for(category)?;
                let count =
                    self.ledger
                        .count_in_window(guild_id, user_id, category, limit.window_secs, now);
                (count > 0).then_some((category, count))
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Membership churn and drift
    // ------------------------------------------------------------------------

    pub async fn handle_member_leave(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &[u64],
    ) -> Result<usize, AntiNukeError> {
        Ok(self
            .role_backup
            .on_member_leave(guild_id, user_id, role_ids)
            .await?)
    }

    /// Restore backed-up roles, resume any quarantine the member left behind, then
    /// check their name against the blacklist.
    pub async fn handle_member_join(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
    ) -> Result<Option<EnforcementReport>, AntiNukeError> {
        match self.role_backup.on_member_join(guild_id, user_id).await {
            Ok(Some(restored)) if !restored.is_empty() => {
                let details = format!("restored {} role(s) on rejoin", restored.len());
                self.notify(guild_id, NotificationKind::RolesRestored, user_id, &details)
                    .await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(guild_id, user_id, "Role restore on join failed: {}", e),
        }

        if let Some(outcome) = self.controller.resume_after_rejoin(guild_id, user_id).await {
            tracing::info!(
                guild_id,
                user_id,
                success = outcome.success,
                "Quarantine resumed on rejoin: {}",
                outcome.reason
            );
        }

        match self.classify_text(username).await? {
            Some(word) => {
                let detail = format!("username contains blacklisted word \"{word}\"");
                self.handle_content(guild_id, user_id, ViolationKind::FlaggedUsername, &detail)
                    .await
            }
            None => Ok(None),
        }
    }

    pub async fn handle_member_update(
        &self,
        guild_id: u64,
        user_id: u64,
        role_ids: &BTreeSet<u64>,
    ) -> Option<QuarantineOutcome> {
        self.controller.enforce(guild_id, user_id, role_ids).await
    }

    /// Reload persisted quarantines for every configured guild. Call once at startup.
    pub async fn restore_state(&self) -> Result<usize, AntiNukeError> {
        let mut restored = 0;
        for config in self.configs.list_configs().await? {
            restored += self.controller.restore_guild(config.guild_id).await?;
        }
        Ok(restored)
    }

    // ------------------------------------------------------------------------
    // Configuration and content policy
    // ------------------------------------------------------------------------

    pub async fn get_config(&self, guild_id: u64) -> Result<Option<GuildSecurityConfig>, AntiNukeError> {
        Ok(self.configs.get_config(guild_id).await?)
    }

    /// Load (or create) the guild's config, apply `change` and save it.
    pub async fn update_config(
        &self,
        guild_id: u64,
        change: impl FnOnce(&mut GuildSecurityConfig),
    ) -> Result<GuildSecurityConfig, AntiNukeError> {
        let mut config = self
            .configs
            .get_config(guild_id)
            .await?
            .unwrap_or_else(|| GuildSecurityConfig::new(guild_id));
        change(&mut config);
        self.configs.save_config(&config).await?;
        Ok(config)
    }

    pub async fn add_blacklisted_word(&self, word: &str) -> Result<bool, AntiNukeError> {
        Ok(self.configs.add_blacklisted_word(word.trim()).await?)
    }

    pub async fn remove_blacklisted_word(&self, word: &str) -> Result<bool, AntiNukeError> {
        Ok(self.configs.remove_blacklisted_word(word.trim()).await?)
    }

    pub async fn blacklisted_words(&self) -> Result<Vec<String>, AntiNukeError> {
        Ok(self.configs.blacklisted_words().await?)
    }

    /// First blacklisted entry found in `text`, case-insensitive.
    ///
    /// Single words must match a whole word; entries containing spaces match as
    /// a substring.
    pub async fn classify_text(&self, text: &str) -> Result<Option<String>, AntiNukeError> {
        let words = self.configs.blacklisted_words().await?;
        Ok(find_blacklisted(text, &words))
    }

    /// Snapshot the guild's config, the blacklist and its live quarantines.
    pub async fn create_config_backup(&self, guild_id: u64) -> Result<ConfigBackup, AntiNukeError> {
        let data = ConfigBackupData {
            config: self.configs.get_config(guild_id).await?,
            blacklisted_words: self.configs.blacklisted_words().await?,
            quarantined: self
                .controller
                .records_for_guild(guild_id)
                .iter()
                .map(Into::into)
                .collect(),
        };
        let backup = self.config_backups.create_backup(guild_id, &data).await?;
        tracing::info!(
            guild_id,
            backup_id = backup.id,
            quarantined = data.quarantined.len(),
            "Config backup created"
        );
        Ok(backup)
    }

    pub async fn config_backups(&self, guild_id: u64, limit: u32) -> Result<Vec<ConfigBackup>, AntiNukeError> {
        Ok(self.config_backups.list_backups(guild_id, limit).await?)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn active_config(&self, guild_id: u64) -> Result<Option<GuildSecurityConfig>, AntiNukeError> {
        Ok(self
            .configs
            .get_config(guild_id)
            .await?
            .filter(|c| c.enabled))
    }

    async fn with_timeout(
        &self,
        request: impl std::future::Future<Output = Result<(), RoleApiError>>,
    ) -> Result<(), RoleApiError> {
        bounded_call(self.role_call_timeout, request).await
    }

    async fn notify(&self, guild_id: u64, kind: NotificationKind, user_id: u64, details: &str) {
        if let Err(e) = self.notifier.notify(guild_id, kind, user_id, details).await {
            tracing::warn!(guild_id, user_id, ?kind, "Dropping notification: {}", e);
        }
    }
}

fn find_blacklisted(text: &str, words: &[String]) -> Option<String> {
    let lower = text.to_lowercase();
    let tokens: BTreeSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    words
        .iter()
        .find(|word| {
            if word.contains(char::is_whitespace) {
                lower.contains(word.as_str())
            } else {
                tokens.contains(word.as_str())
            }
        })
        .cloned()
}
