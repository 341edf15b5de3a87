// Bypass arbiter - decides whether a bypass grant suppresses a punishment.
//
// Which violations are critical / security / normal is data (TierPolicy), loaded
// from JSON when the operator supplies one. Bypass is read through the Member
// Role Service on every call; nothing is cached.

use super::antinuke_models::{
    ActionCategory, BypassDecision, Tier, Violation, ViolationKind,
};
use super::member_roles::{bounded_call, MemberRoleService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub kind: ViolationKind,
    pub tier: Tier,
}

/// Classification table. Kinds without a rule fall back to `default_tier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub rules: Vec<TierRule>,
    #[serde(default = "default_tier")]
    pub default_tier: Tier,
}

fn default_tier() -> Tier {
    Tier::Normal
}

impl TierPolicy {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn tier_for(&self, kind: ViolationKind) -> Tier {
        self.rules
            .iter()
            .find(|rule| rule.kind == kind)
            .map(|rule| rule.tier)
            .unwrap_or(self.default_tier)
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        let rule = |kind, tier| TierRule { kind, tier };
        Self {
            rules: vec![
                rule(ViolationKind::BlacklistedWord, Tier::Critical),
                rule(ViolationKind::NsfwContent, Tier::Critical),
                rule(ViolationKind::FlaggedUsername, Tier::Critical),
                rule(ViolationKind::BypassEscape, Tier::Critical),
                rule(
                    ViolationKind::Threshold(ActionCategory::ChannelDelete),
                    Tier::Security,
                ),
                rule(
                    ViolationKind::Threshold(ActionCategory::RoleDelete),
                    Tier::Security,
                ),
                rule(
                    ViolationKind::Threshold(ActionCategory::MemberKick),
                    Tier::Security,
                ),
                rule(
                    ViolationKind::Threshold(ActionCategory::MemberBan),
                    Tier::Security,
                ),
                rule(ViolationKind::RaidPattern, Tier::Security),
            ],
            default_tier: Tier::Normal,
        }
    }
}

pub struct BypassArbiter {
    roles: Arc<dyn MemberRoleService>,
    tiers: TierPolicy,
    role_call_timeout: Duration,
}

impl BypassArbiter {
    pub fn new(roles: Arc<dyn MemberRoleService>, tiers: TierPolicy, role_call_timeout: Duration) -> Self {
        Self {
            roles,
            tiers,
            role_call_timeout,
        }
    }

    /// Decide whether the violation's punishment is suppressed.
    ///
    /// Without a configured bypass role nothing is ever suppressed. A failed
    /// or timed-out member lookup counts as "no bypass".
    pub async fn decide(&self, violation: &Violation, bypass_role_id: Option<u64>) -> BypassDecision {
        let tier = self.tiers.tier_for(violation.kind);
        let not_suppressed = |override_reason: Option<&str>| BypassDecision {
            suppress: false,
            tier,
            override_reason: override_reason.map(str::to_string),
        };

        let Some(bypass_role_id) = bypass_role_id else {
            return not_suppressed(None);
        };

        let lookup = self.roles.fetch_member(violation.guild_id, violation.user_id);
        let has_bypass = match bounded_call(self.role_call_timeout, lookup).await {
            Ok(member) => member.role_ids.contains(&bypass_role_id),
            Err(e) => {
                tracing::warn!(
                    guild_id = violation.guild_id,
                    user_id = violation.user_id,
                    "Could not check bypass role, treating as absent: {}",
                    e
                );
                false
            }
        };

        if !has_bypass {
            return not_suppressed(None);
        }

        match tier {
            Tier::Critical => not_suppressed(Some("critical violations ignore bypass")),
            Tier::Security => not_suppressed(Some("security violations override bypass")),
            Tier::Normal => {
                tracing::info!(
                    guild_id = violation.guild_id,
                    user_id = violation.user_id,
                    kind = %violation.kind,
                    "Punishment bypassed"
                );
                BypassDecision {
                    suppress: true,
                    tier,
                    override_reason: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::antinuke::antinuke_models::Severity;
    use crate::core::antinuke::test_support::FakeRoleService;

    const GUILD: u64 = 100;
    const USER: u64 = 7;
    const BYPASS: u64 = 900;
    const TIMEOUT: Duration = Duration::from_secs(1);

    fn violation(kind: ViolationKind) -> Violation {
        Violation {
            guild_id: GUILD,
            user_id: USER,
            kind,
            severity: Severity::Critical,
            count: 1,
            detail: String::new(),
        }
    }

    fn arbiter_with_bypass_holder() -> BypassArbiter {
        let roles = FakeRoleService::new();
        roles.add_guild_roles(GUILD, &[BYPASS, 10]);
        roles.add_member(GUILD, USER, &[BYPASS, 10]);
        BypassArbiter::new(Arc::new(roles), TierPolicy::default(), TIMEOUT)
    }

    #[tokio::test]
    async fn test_critical_violation_ignores_bypass() {
        let arbiter = arbiter_with_bypass_holder();
        let decision = arbiter
            .decide(&violation(ViolationKind::BlacklistedWord), Some(BYPASS))
            .await;

        assert!(!decision.suppress);
        assert_eq!(decision.tier, Tier::Critical);
        assert!(decision.override_reason.is_some());
    }

    #[tokio::test]
    async fn test_security_violation_overrides_bypass() {
        let arbiter = arbiter_with_bypass_holder();
        let decision = arbiter
            .decide(
                &violation(ViolationKind::Threshold(ActionCategory::RoleDelete)),
                Some(BYPASS),
            )
            .await;

        assert!(!decision.suppress);
        assert_eq!(decision.tier, Tier::Security);
    }

    #[tokio::test]
    async fn test_normal_violation_suppressed_for_bypass_holder() {
        let arbiter = arbiter_with_bypass_holder();
        let decision = arbiter
            .decide(
                &violation(ViolationKind::Threshold(ActionCategory::EmojiCreate)),
                Some(BYPASS),
            )
            .await;

        assert!(decision.suppress);
        assert_eq!(decision.tier, Tier::Normal);
    }

    #[tokio::test]
    async fn test_no_bypass_role_configured_never_suppresses() {
        let arbiter = arbiter_with_bypass_holder();
        let decision = arbiter
            .decide(&violation(ViolationKind::Threshold(ActionCategory::MessageSpam)), None)
            .await;
        assert!(!decision.suppress);
    }

    #[tokio::test]
    async fn test_member_without_bypass_role_not_suppressed() {
        let roles = FakeRoleService::new();
        roles.add_member(GUILD, USER, &[10]);
        let arbiter = BypassArbiter::new(Arc::new(roles), TierPolicy::default(), TIMEOUT);

        let decision = arbiter
            .decide(&violation(ViolationKind::Threshold(ActionCategory::GuildUpdate)), Some(BYPASS))
            .await;
        assert!(!decision.suppress);
        assert!(decision.override_reason.is_none());
    }

    #[tokio::test]
    async fn test_failed_lookup_does_not_suppress() {
        let arbiter = BypassArbiter::new(Arc::new(FakeRoleService::new()), TierPolicy::default(), TIMEOUT);
        let decision = arbiter
            .decide(&violation(ViolationKind::Threshold(ActionCategory::EmojiDelete)), Some(BYPASS))
            .await;
        assert!(!decision.suppress);
    }

    #[tokio::test]
    async fn test_hung_lookup_counts_as_no_bypass() {
        let roles = FakeRoleService::new();
        roles.add_member(GUILD, USER, &[BYPASS]);
        roles.hang_everything.store(true, std::sync::atomic::Ordering::SeqCst);
        let arbiter = BypassArbiter::new(Arc::new(roles), TierPolicy::default(), Duration::from_millis(20));

        let decision = tokio::time::timeout(
            Duration::from_secs(2),
            arbiter.decide(&violation(ViolationKind::Threshold(ActionCategory::EmojiCreate)), Some(BYPASS)),
        )
        .await
        .expect("decide must not hang on the role lookup");

        assert!(!decision.suppress);
        assert_eq!(decision.tier, Tier::Normal);
    }

    #[test]
    fn test_tier_policy_loads_from_json() {
        let json = r#"{
            "rules": [
                { "kind": { "threshold": "emoji_create" }, "tier": "security" },
                { "kind": "nsfw_content", "tier": "critical" }
            ],
            "default_tier": "security"
        }"#;
        let policy = TierPolicy::from_json(json).unwrap();

        assert_eq!(
            policy.tier_for(ViolationKind::Threshold(ActionCategory::EmojiCreate)),
            Tier::Security
        );
        assert_eq!(policy.tier_for(ViolationKind::NsfwContent), Tier::Critical);
        // Unlisted kinds use the configured default.
        assert_eq!(policy.tier_for(ViolationKind::BlacklistedWord), Tier::Security);
    }

    #[test]
    fn test_default_policy_classification() {
        let policy = TierPolicy::default();
        assert_eq!(policy.tier_for(ViolationKind::FlaggedUsername), Tier::Critical);
        assert_eq!(
            policy.tier_for(ViolationKind::Threshold(ActionCategory::MemberBan)),
            Tier::Security
        );
        assert_eq!(
            policy.tier_for(ViolationKind::Threshold(ActionCategory::MessageSpam)),
            Tier::Normal
        );
    }
}
