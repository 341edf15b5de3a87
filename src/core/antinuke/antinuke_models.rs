// Anti-nuke domain models - data structures for the threat-detection and quarantine engine.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts gateway events into these and turns verdicts back into actions.

use super::release_scheduler::ReleaseToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Rolling window used for `MessageSpam`, independent of per-category limits.
pub const SPAM_WINDOW_SECS: u64 = 60;

// ============================================================================
// EVENTS
// ============================================================================

/// Kind of moderation-relevant action an actor performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    ChannelDelete,
    RoleDelete,
    MemberKick,
    MemberBan,
    EmojiCreate,
    EmojiDelete,
    GuildUpdate,
    MessageSpam,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 8] = [
        ActionCategory::ChannelDelete,
        ActionCategory::RoleDelete,
        ActionCategory::MemberKick,
        ActionCategory::MemberBan,
        ActionCategory::EmojiCreate,
        ActionCategory::EmojiDelete,
        ActionCategory::GuildUpdate,
        ActionCategory::MessageSpam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::ChannelDelete => "channel_delete",
            ActionCategory::RoleDelete => "role_delete",
            ActionCategory::MemberKick => "member_kick",
            ActionCategory::MemberBan => "member_ban",
            ActionCategory::EmojiCreate => "emoji_create",
            ActionCategory::EmojiDelete => "emoji_delete",
            ActionCategory::GuildUpdate => "guild_update",
            ActionCategory::MessageSpam => "message_spam",
        }
    }

    /// Threat points added when a threshold on this category is crossed.
    pub fn severity(&self) -> Severity {
        match self {
            ActionCategory::MemberBan
            | ActionCategory::ChannelDelete
            | ActionCategory::RoleDelete => Severity::High,
            ActionCategory::MemberKick
            | ActionCategory::EmojiCreate
            | ActionCategory::EmojiDelete
            | ActionCategory::GuildUpdate => Severity::Medium,
            ActionCategory::MessageSpam => Severity::Low,
        }
    }
}

impl std::fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown action category: {s}"))
    }
}

/// A single attributed moderation event. Consumed once by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationEvent {
    pub guild_id: u64,
    pub actor_id: u64,
    pub category: ActionCategory,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLimit {
    /// Events allowed inside the window before a violation fires. 0 disables the limit.
    pub max_count: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamLimit {
    pub max_messages_per_minute: u32,
}

/// What happens to an actor once a violation is not suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Punishment {
    #[default]
    Quarantine,
    Kick,
    Ban,
}

impl Punishment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Punishment::Quarantine => "quarantine",
            Punishment::Kick => "kick",
            Punishment::Ban => "ban",
        }
    }
}

impl FromStr for Punishment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quarantine" => Ok(Punishment::Quarantine),
            "kick" => Ok(Punishment::Kick),
            "ban" => Ok(Punishment::Ban),
            other => Err(format!("unknown punishment: {other}")),
        }
    }
}

/// Per-guild thresholds. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub limits: BTreeMap<ActionCategory, CategoryLimit>,
    pub spam: SpamLimit,
    pub default_punishment: Punishment,
}

impl PolicyConfig {
    /// Effective limit for a category. Spam always uses the global one-minute window.
    pub fn limit_for(&self, category: ActionCategory) -> Option<CategoryLimit> {
        if category == ActionCategory::MessageSpam {
            return Some(CategoryLimit {
                max_count: self.spam.max_messages_per_minute,
                window_secs: SPAM_WINDOW_SECS,
            });
        }
        self.limits.get(&category).copied()
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let limit = |max_count, window_secs| CategoryLimit {
            max_count,
            window_secs,
        };
        let limits = BTreeMap::from([
            (ActionCategory::ChannelDelete, limit(3, 30)),
            (ActionCategory::RoleDelete, limit(3, 30)),
            (ActionCategory::MemberKick, limit(3, 30)),
            (ActionCategory::MemberBan, limit(3, 30)),
            (ActionCategory::EmojiCreate, limit(5, 30)),
            (ActionCategory::EmojiDelete, limit(3, 30)),
            (ActionCategory::GuildUpdate, limit(3, 60)),
        ]);

        Self {
            limits,
            spam: SpamLimit {
                max_messages_per_minute: 10,
            },
            default_punishment: Punishment::Quarantine,
        }
    }
}

/// Everything the engine needs to know about one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSecurityConfig {
    pub guild_id: u64,
    pub enabled: bool,
    pub quarantine_role_id: Option<u64>,
    pub bypass_role_id: Option<u64>,
    pub log_channel_id: Option<u64>,
    pub policy: PolicyConfig,
}

impl GuildSecurityConfig {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            enabled: true,
            quarantine_role_id: None,
            bypass_role_id: None,
            log_channel_id: None,
            policy: PolicyConfig::default(),
        }
    }
}

// ============================================================================
// VIOLATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Threshold(ActionCategory),
    BlacklistedWord,
    NsfwContent,
    FlaggedUsername,
    BypassEscape,
    RaidPattern,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::Threshold(category) => write!(f, "mass {category}"),
            ViolationKind::BlacklistedWord => write!(f, "blacklisted word"),
            ViolationKind::NsfwContent => write!(f, "NSFW content"),
            ViolationKind::FlaggedUsername => write!(f, "flagged username"),
            ViolationKind::BypassEscape => write!(f, "bypass escape attempt"),
            ViolationKind::RaidPattern => write!(f, "raid pattern"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 5,
        }
    }
}

/// Verdict that a threshold or absolute rule was crossed.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub guild_id: u64,
    pub user_id: u64,
    pub kind: ViolationKind,
    pub severity: Severity,
    /// Events in the window at the moment of firing (1 for content violations).
    pub count: usize,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Never suppressed.
    Critical,
    /// Overrides bypass.
    Security,
    /// Suppressed for bypass holders.
    Normal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BypassDecision {
    pub suppress: bool,
    pub tier: Tier,
    pub override_reason: Option<String>,
}

// ============================================================================
// QUARANTINE
// ============================================================================

/// One quarantined member. At most one exists per (user_id, guild_id).
#[derive(Debug, Clone)]
pub struct QuarantineRecord {
    pub user_id: u64,
    pub guild_id: u64,
    /// Never contains the everyone-role or the quarantine role.
    pub original_role_ids: BTreeSet<u64>,
    pub quarantine_role_id: u64,
    pub reason: String,
    pub quarantine_time: DateTime<Utc>,
    pub release_at: Option<DateTime<Utc>>,
    /// Live timer for auto-release. Not persisted.
    pub release_timer: Option<ReleaseToken>,
}

/// Roles a member held when they left a guild.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleBackupSnapshot {
    pub user_id: u64,
    pub guild_id: u64,
    pub role_ids: BTreeSet<u64>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// CONFIG BACKUPS
// ============================================================================

/// A quarantine as written into a config backup. Timers are not included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedEntry {
    pub user_id: u64,
    pub original_role_ids: BTreeSet<u64>,
    pub quarantine_role_id: u64,
    pub reason: String,
    pub quarantine_time: DateTime<Utc>,
    pub release_at: Option<DateTime<Utc>>,
}

impl From<&QuarantineRecord> for QuarantinedEntry {
    fn from(record: &QuarantineRecord) -> Self {
        Self {
            user_id: record.user_id,
            original_role_ids: record.original_role_ids.clone(),
            quarantine_role_id: record.quarantine_role_id,
            reason: record.reason.clone(),
            quarantine_time: record.quarantine_time,
            release_at: record.release_at,
        }
    }
}

/// Snapshot body, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigBackupData {
    /// None when the guild never changed its settings.
    pub config: Option<GuildSecurityConfig>,
    pub blacklisted_words: Vec<String>,
    pub quarantined: Vec<QuarantinedEntry>,
}

/// One stored config backup. Ids increase with every backup taken.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigBackup {
    pub id: i64,
    pub guild_id: u64,
    pub created_at: DateTime<Utc>,
    pub data: ConfigBackupData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineState {
    Unquarantined,
    Quarantining,
    Quarantined,
    Releasing,
    QuarantineFailed,
    ReleaseFailed,
}

/// Result of a quarantine or release. The controller reports through this
/// instead of returning errors.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineOutcome {
    pub success: bool,
    pub state: QuarantineState,
    pub reason: String,
    pub attempts: u32,
}

impl QuarantineOutcome {
    pub fn ok(state: QuarantineState, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: true,
            state,
            reason: reason.into(),
            attempts,
        }
    }

    pub fn failed(state: QuarantineState, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: false,
            state,
            reason: reason.into(),
            attempts,
        }
    }
}

/// What the orchestration layer did about a violation.
#[derive(Debug, Clone, PartialEq)]
pub enum EnforcementAction {
    Suppressed,
    Quarantined(QuarantineOutcome),
    Kicked,
    Banned,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnforcementReport {
    pub violation: Violation,
    pub decision: BypassDecision,
    pub action: EnforcementAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_str() {
        for category in ActionCategory::ALL {
            assert_eq!(category.as_str().parse::<ActionCategory>(), Ok(category));
        }
        assert!("channel_create".parse::<ActionCategory>().is_err());
    }

    #[test]
    fn test_spam_limit_uses_one_minute_window() {
        let policy = PolicyConfig::default();
        let limit = policy.limit_for(ActionCategory::MessageSpam).unwrap();
        assert_eq!(limit.window_secs, 60);
        assert_eq!(limit.max_count, 10);
    }

    #[test]
    fn test_policy_serializes_with_snake_case_keys() {
        let json = serde_json::to_string(&PolicyConfig::default()).unwrap();
        assert!(json.contains("\"channel_delete\""));
        assert!(json.contains("\"quarantine\""));

        let parsed: PolicyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, PolicyConfig::default());
    }
}
