// Policy evaluator - turns ledger counts into violation verdicts.

use super::antinuke_models::{ModerationEvent, PolicyConfig, Severity, Violation, ViolationKind};
use super::threat_ledger::ThreatLedger;
use std::sync::Arc;

pub struct PolicyEvaluator {
    ledger: Arc<ThreatLedger>,
}

impl PolicyEvaluator {
    pub fn new(ledger: Arc<ThreatLedger>) -> Self {
        Self { ledger }
    }

    /// Record the event and check the category threshold.
    ///
    /// Fires only on the first crossing; further events while the window is still
    /// at or above the limit stay quiet. Firing adds the category weight to the
    /// actor's threat level.
    pub fn evaluate(&self, event: &ModerationEvent, policy: &PolicyConfig) -> Option<Violation> {
        let limit = policy.limit_for(event.category)?;

        let (count, fired) = self.ledger.record_and_latch(
            event.guild_id,
            event.actor_id,
            event.category,
            event.timestamp,
            limit.window_secs,
            limit.max_count,
        );
        if !fired {
            return None;
        }

        let severity = event.category.severity();
        let threat_level = self
            .ledger
            .add_threat(event.guild_id, event.actor_id, severity.weight());

        tracing::warn!(
            guild_id = event.guild_id,
            user_id = event.actor_id,
            category = %event.category,
            count,
            threat_level,
            "Threshold crossed"
        );

        Some(Violation {
            guild_id: event.guild_id,
            user_id: event.actor_id,
            kind: ViolationKind::Threshold(event.category),
            severity,
            count,
            detail: format!(
                "{} {} actions within {} seconds",
                count, event.category, limit.window_secs
            ),
        })
    }

    /// Content-policy violations skip the counters and are always critical.
    pub fn content_violation(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ViolationKind,
        detail: impl Into<String>,
    ) -> Violation {
        let severity = Severity::Critical;
        let threat_level = self.ledger.add_threat(guild_id, user_id, severity.weight());
        tracing::warn!(guild_id, user_id, %kind, threat_level, "Content violation");

        Violation {
            guild_id,
            user_id,
            kind,
            severity,
            count: 1,
            detail: detail.into(),
        }
    }

    pub fn threat_level(&self, guild_id: u64, user_id: u64) -> u32 {
        self.ledger.threat_level(guild_id, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::antinuke::antinuke_models::{ActionCategory, CategoryLimit};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(category: ActionCategory, secs: i64) -> ModerationEvent {
        ModerationEvent {
            guild_id: 100,
            actor_id: 7,
            category,
            timestamp: at(secs),
        }
    }

    fn strict_policy() -> PolicyConfig {
        let mut policy = PolicyConfig::default();
        policy.limits.insert(
            ActionCategory::ChannelDelete,
            CategoryLimit {
                max_count: 3,
                window_secs: 30,
            },
        );
        policy
    }

    #[test]
    fn test_three_deletes_fire_exactly_once() {
        let ledger = Arc::new(ThreatLedger::new());
        let evaluator = PolicyEvaluator::new(Arc::clone(&ledger));
        let policy = strict_policy();

        assert!(evaluator
            .evaluate(&event(ActionCategory::ChannelDelete, 0), &policy)
            .is_none());
        assert!(evaluator
            .evaluate(&event(ActionCategory::ChannelDelete, 5), &policy)
            .is_none());

        let violation = evaluator
            .evaluate(&event(ActionCategory::ChannelDelete, 10), &policy)
            .expect("third delete should fire");
        assert_eq!(
            violation.kind,
            ViolationKind::Threshold(ActionCategory::ChannelDelete)
        );
        assert_eq!(violation.severity.weight(), 3);
        assert_eq!(violation.count, 3);
        assert_eq!(evaluator.threat_level(100, 7), 3);

        // Fourth delete in the same window stays quiet.
        assert!(evaluator
            .evaluate(&event(ActionCategory::ChannelDelete, 12), &policy)
            .is_none());
        assert_eq!(evaluator.threat_level(100, 7), 3);
    }

    #[test]
    fn test_count_restarts_after_window_ages_out() {
        let ledger = Arc::new(ThreatLedger::new());
        let evaluator = PolicyEvaluator::new(Arc::clone(&ledger));
        let policy = strict_policy();

        for secs in [0, 5, 10, 12] {
            evaluator.evaluate(&event(ActionCategory::ChannelDelete, secs), &policy);
        }

        assert!(evaluator
            .evaluate(&event(ActionCategory::ChannelDelete, 200), &policy)
            .is_none());
        assert_eq!(
            ledger.count_in_window(100, 7, ActionCategory::ChannelDelete, 30, at(200)),
            1
        );

        // A fresh burst fires again.
        evaluator.evaluate(&event(ActionCategory::ChannelDelete, 201), &policy);
        assert!(evaluator
            .evaluate(&event(ActionCategory::ChannelDelete, 202), &policy)
            .is_some());
        assert_eq!(evaluator.threat_level(100, 7), 6);
    }

    #[test]
    fn test_concurrent_burst_adds_threat_once() {
        let evaluator = PolicyEvaluator::new(Arc::new(ThreatLedger::new()));
        let policy = strict_policy();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let (evaluator, policy) = (&evaluator, &policy);
                scope.spawn(move || {
                    for i in 0..5 {
                        evaluator.evaluate(&event(ActionCategory::ChannelDelete, worker * 5 + i), policy);
                    }
                });
            }
        });

        assert_eq!(evaluator.threat_level(100, 7), 3);
    }

    #[test]
    fn test_severity_weights_per_category() {
        assert_eq!(ActionCategory::MemberBan.severity().weight(), 3);
        assert_eq!(ActionCategory::RoleDelete.severity().weight(), 3);
        assert_eq!(ActionCategory::MemberKick.severity().weight(), 2);
        assert_eq!(ActionCategory::EmojiCreate.severity().weight(), 2);
        assert_eq!(ActionCategory::GuildUpdate.severity().weight(), 2);
        assert_eq!(ActionCategory::MessageSpam.severity().weight(), 1);
    }

    #[test]
    fn test_spam_uses_messages_per_minute() {
        let evaluator = PolicyEvaluator::new(Arc::new(ThreatLedger::new()));
        let mut policy = PolicyConfig::default();
        policy.spam.max_messages_per_minute = 3;

        // Spread over 50 seconds: still inside the one-minute window.
        evaluator.evaluate(&event(ActionCategory::MessageSpam, 0), &policy);
        evaluator.evaluate(&event(ActionCategory::MessageSpam, 25), &policy);
        let violation = evaluator
            .evaluate(&event(ActionCategory::MessageSpam, 50), &policy)
            .expect("third message within a minute should fire");
        assert_eq!(violation.severity.weight(), 1);
    }

    #[test]
    fn test_disabled_limit_never_fires() {
        let evaluator = PolicyEvaluator::new(Arc::new(ThreatLedger::new()));
        let mut policy = PolicyConfig::default();
        policy.limits.insert(
            ActionCategory::GuildUpdate,
            CategoryLimit {
                max_count: 0,
                window_secs: 60,
            },
        );

        for secs in 0..10 {
            assert!(evaluator
                .evaluate(&event(ActionCategory::GuildUpdate, secs), &policy)
                .is_none());
        }
    }

    #[test]
    fn test_content_violation_is_always_critical() {
        let evaluator = PolicyEvaluator::new(Arc::new(ThreatLedger::new()));
        let violation =
            evaluator.content_violation(100, 7, ViolationKind::BlacklistedWord, "said a bad word");

        assert_eq!(violation.severity, Severity::Critical);
        assert_eq!(violation.count, 1);
        assert_eq!(evaluator.threat_level(100, 7), 5);
    }
}
