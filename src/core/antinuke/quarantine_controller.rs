// Quarantine controller - strips a member down to the quarantine role and puts
// their roles back later.
//
// State per member: Unquarantined -> Quarantining -> Quarantined -> Releasing -> Unquarantined.
// QuarantineFailed / ReleaseFailed are only reported in the outcome, never kept.
// A release that finds the member gone leaves the record due, and it completes
// when they rejoin.
//
// Every quarantine/release for one (guild, member) runs under that member's mutex,
// so a manual release, an auto-release timer and a new quarantine never interleave
// their role mutations. Different members never share a lock.

use super::antinuke_models::{QuarantineOutcome, QuarantineRecord, QuarantineState};
use super::antinuke_store::{QuarantineStore, StoreError};
use super::member_roles::{bounded_call, MemberRoleService, RoleApiError};
use super::notifier::{NotificationKind, Notifier};
use super::release_scheduler::{ReleaseScheduler, ReleaseToken};
use super::retry::{RetryState, Sleeper};
use super::threat_ledger::ThreatLedger;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const RELEASE_REASON: &str = "Anti-nuke quarantine released";

#[derive(Debug, Clone)]
pub struct QuarantineSettings {
    pub max_attempts: u32,
    /// Delay after attempt n is n × backoff_base.
    pub backoff_base: Duration,
    /// Upper bound for a single role API call.
    pub role_call_timeout: Duration,
    pub release_verify_attempts: u32,
    pub release_verify_delay: Duration,
    /// Pause between removing the quarantine role and re-adding roles in the fallback path.
    pub release_step_delay: Duration,
}

impl Default for QuarantineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            role_call_timeout: Duration::from_secs(10),
            release_verify_attempts: 3,
            release_verify_delay: Duration::from_secs(1),
            release_step_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuarantineRequest {
    pub guild_id: u64,
    pub user_id: u64,
    pub quarantine_role_id: u64,
    pub reason: String,
    /// Auto-release after this long. None = until released manually.
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTrigger {
    Manual,
    /// Fired by the auto-release timer with this token id.
    Timer(u64),
}

pub struct QuarantineController {
    roles: Arc<dyn MemberRoleService>,
    store: Arc<dyn QuarantineStore>,
    notifier: Arc<dyn Notifier>,
    sleeper: Arc<dyn Sleeper>,
    ledger: Arc<ThreatLedger>,
    scheduler: ReleaseScheduler,
    settings: QuarantineSettings,
    /// (guild_id, user_id) -> active quarantine
    records: DashMap<(u64, u64), QuarantineRecord>,
    /// Members currently mid-quarantine or mid-release.
    transitions: DashMap<(u64, u64), QuarantineState>,
    locks: DashMap<(u64, u64), Arc<Mutex<()>>>,
}

impl QuarantineController {
    pub fn new(
        roles: Arc<dyn MemberRoleService>,
        store: Arc<dyn QuarantineStore>,
        notifier: Arc<dyn Notifier>,
        sleeper: Arc<dyn Sleeper>,
        ledger: Arc<ThreatLedger>,
        settings: QuarantineSettings,
    ) -> Self {
        Self {
            roles,
            store,
            notifier,
            sleeper,
            ledger,
            scheduler: ReleaseScheduler::new(),
            settings,
            records: DashMap::new(),
            transitions: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn state(&self, guild_id: u64, user_id: u64) -> QuarantineState {
        let key = (guild_id, user_id);
        if let Some(state) = self.transitions.get(&key) {
            return *state;
        }
        if self.records.contains_key(&key) {
            QuarantineState::Quarantined
        } else {
            QuarantineState::Unquarantined
        }
    }

    pub fn is_quarantined(&self, guild_id: u64, user_id: u64) -> bool {
        self.records.contains_key(&(guild_id, user_id))
    }

    pub fn record(&self, guild_id: u64, user_id: u64) -> Option<QuarantineRecord> {
        self.records.get(&(guild_id, user_id)).map(|r| r.clone())
    }

    pub fn records_for_guild(&self, guild_id: u64) -> Vec<QuarantineRecord> {
        let mut records: Vec<QuarantineRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == guild_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.quarantine_time);
        records
    }

    // ------------------------------------------------------------------------
    // Quarantine
    // ------------------------------------------------------------------------

    /// Strip the member down to exactly the quarantine role.
    ///
    /// Idempotent: an already quarantined member is left alone (and no new timer
    /// is armed). Nothing is persisted unless the role state was verified.
    pub async fn quarantine(self: &Arc<Self>, request: QuarantineRequest) -> QuarantineOutcome {
        let key = (request.guild_id, request.user_id);
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        if self.records.contains_key(&key) {
            return QuarantineOutcome::ok(QuarantineState::Quarantined, "already quarantined", 0);
        }

        self.transitions.insert(key, QuarantineState::Quarantining);
        let outcome = self.quarantine_locked(&request).await;
        self.transitions.remove(&key);
        outcome
    }

    async fn quarantine_locked(self: &Arc<Self>, request: &QuarantineRequest) -> QuarantineOutcome {
        let guild_id = request.guild_id;
        let user_id = request.user_id;
        let quarantine_role_id = request.quarantine_role_id;
        let audit_reason = format!("Anti-nuke quarantine: {}", request.reason);

        let member = match self.call(self.roles.fetch_member(guild_id, user_id)).await {
            Ok(member) => member,
            Err(RoleApiError::MemberNotFound) => {
                tracing::debug!(guild_id, user_id, "Member left before quarantine");
                return QuarantineOutcome::failed(
                    QuarantineState::Unquarantined,
                    "member is not in the guild",
                    0,
                );
            }
            Err(e) => {
                let reason = format!("could not read member roles: {e}");
                self.notify(guild_id, NotificationKind::QuarantineFailed, user_id, &reason)
                    .await;
                return QuarantineOutcome::failed(QuarantineState::QuarantineFailed, reason, 0);
            }
        };

        let managed = self.managed_roles(guild_id).await;
        let original_role_ids: BTreeSet<u64> = member
            .role_ids
            .iter()
            .copied()
            .filter(|id| *id != guild_id && *id != quarantine_role_id && !managed.contains(id))
            .collect();

        let mut retry = RetryState::new(self.settings.max_attempts);
        while retry.begin_attempt() {
            let attempt = retry.attempt;
            match self
                .apply_quarantine_roles(guild_id, user_id, quarantine_role_id, &managed, &audit_reason)
                .await
            {
                Ok(true) => {
                    return self
                        .finish_quarantine(request, original_role_ids, attempt)
                        .await;
                }
                Ok(false) => retry.record_failure("role set did not match after correction"),
                Err(RoleApiError::MemberNotFound) => {
                    tracing::debug!(guild_id, user_id, "Member left during quarantine");
                    return QuarantineOutcome::failed(
                        QuarantineState::Unquarantined,
                        "member left the guild",
                        attempt,
                    );
                }
                Err(e) if e.is_retryable() => retry.record_failure(e.to_string()),
                Err(e) => {
                    let reason = format!("aborted: {e}");
                    tracing::error!(guild_id, user_id, attempt, "Quarantine {}", reason);
                    self.notify(guild_id, NotificationKind::QuarantineFailed, user_id, &reason)
                        .await;
                    return QuarantineOutcome::failed(
                        QuarantineState::QuarantineFailed,
                        reason,
                        attempt,
                    );
                }
            }

            tracing::warn!(
                guild_id,
                user_id,
                attempt,
                max_attempts = retry.max_attempts,
                "Quarantine attempt failed: {}",
                retry.last_error_or("unknown")
            );

            if !retry.is_exhausted() {
                self.sleeper
                    .sleep(retry.backoff(self.settings.backoff_base))
                    .await;
            }
        }

        let reason = format!(
            "gave up after {} attempts: {}",
            retry.attempt,
            retry.last_error_or("unknown")
        );
        tracing::error!(guild_id, user_id, "Quarantine {}", reason);
        self.notify(guild_id, NotificationKind::QuarantineFailed, user_id, &reason)
            .await;
        QuarantineOutcome::failed(QuarantineState::QuarantineFailed, reason, retry.attempt)
    }

    /// One attempt: atomic replace + verify, then incremental correction + verify.
    ///
    /// Ok(false) means the roles still do not match. Permission and
    /// member-not-found errors end the attempt immediately.
    async fn apply_quarantine_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        quarantine_role_id: u64,
        managed: &BTreeSet<u64>,
        audit_reason: &str,
    ) -> Result<bool, RoleApiError> {
        let target = BTreeSet::from([quarantine_role_id]);

        match self
            .call(self.roles.set_roles(guild_id, user_id, &target, audit_reason))
            .await
        {
            Ok(()) => {
                if self
                    .verify_quarantined(guild_id, user_id, quarantine_role_id, managed)
                    .await?
                {
                    return Ok(true);
                }
                tracing::debug!(guild_id, user_id, "Role replace did not stick, correcting incrementally");
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                tracing::warn!(guild_id, user_id, "Atomic role replace failed, correcting incrementally: {}", e);
            }
        }

        let member = self.call(self.roles.fetch_member(guild_id, user_id)).await?;
        let extra: Vec<u64> = member
            .role_ids
            .iter()
            .copied()
            .filter(|id| *id != quarantine_role_id && !managed.contains(id))
            .collect();

        for role_id in extra {
            match self
                .call(self.roles.remove_roles(guild_id, user_id, &[role_id], audit_reason))
                .await
            {
                Ok(()) => {}
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => tracing::warn!(guild_id, user_id, role_id, "Could not remove role: {}", e),
            }
        }

        if !member.role_ids.contains(&quarantine_role_id) {
            self.call(
                self.roles
                    .add_roles(guild_id, user_id, &[quarantine_role_id], audit_reason),
            )
            .await?;
        }

        self.verify_quarantined(guild_id, user_id, quarantine_role_id, managed)
            .await
    }

    async fn verify_quarantined(
        &self,
        guild_id: u64,
        user_id: u64,
        quarantine_role_id: u64,
        managed: &BTreeSet<u64>,
    ) -> Result<bool, RoleApiError> {
        let member = self.call(self.roles.fetch_member(guild_id, user_id)).await?;
        let mut unmanaged = member.role_ids.iter().filter(|id| !managed.contains(id));
        Ok(unmanaged.next() == Some(&quarantine_role_id) && unmanaged.next().is_none())
    }

    async fn finish_quarantine(
        self: &Arc<Self>,
        request: &QuarantineRequest,
        original_role_ids: BTreeSet<u64>,
        attempts: u32,
    ) -> QuarantineOutcome {
        let guild_id = request.guild_id;
        let user_id = request.user_id;
        let now = Utc::now();

        let mut record = QuarantineRecord {
            user_id,
            guild_id,
            original_role_ids,
            quarantine_role_id: request.quarantine_role_id,
            reason: request.reason.clone(),
            quarantine_time: now,
            release_at: request
                .duration
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| now + d),
            release_timer: None,
        };

        if let Err(e) = self.store.save(&record).await {
            self.report_durability_gap(guild_id, user_id, "save", &e)
                .await;
        }

        if let Some(duration) = request.duration {
            record.release_timer = Some(self.arm_release_timer(guild_id, user_id, duration));
        }

        let saved_roles = record.original_role_ids.len();
        self.ledger.set_quarantined(guild_id, user_id, true);
        self.records.insert((guild_id, user_id), record);

        tracing::info!(
            guild_id,
            user_id,
            attempts,
            saved_roles,
            "Member quarantined"
        );

        let details = match request.duration {
            Some(d) => format!("{} (auto-release in {}s)", request.reason, d.as_secs()),
            None => request.reason.clone(),
        };
        self.notify(guild_id, NotificationKind::Quarantined, user_id, &details)
            .await;

        QuarantineOutcome::ok(QuarantineState::Quarantined, "quarantined", attempts)
    }

    fn arm_release_timer(self: &Arc<Self>, guild_id: u64, user_id: u64, delay: Duration) -> ReleaseToken {
        let controller = Arc::clone(self);
        self.scheduler.arm(delay, move |token| async move {
            let outcome = controller
                .release(guild_id, user_id, ReleaseTrigger::Timer(token.id()))
                .await;
            tracing::info!(
                guild_id,
                user_id,
                success = outcome.success,
                "Auto-release finished: {}",
                outcome.reason
            );
        })
    }

    // ------------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------------

    /// Put the member's original roles back and forget the quarantine.
    ///
    /// Idempotent: releasing someone who is not quarantined succeeds without
    /// touching roles. A timer whose token no longer matches the record is ignored.
    pub async fn release(&self, guild_id: u64, user_id: u64, trigger: ReleaseTrigger) -> QuarantineOutcome {
        let key = (guild_id, user_id);
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let Some(record) = self.records.get(&key).map(|r| r.clone()) else {
            return QuarantineOutcome::ok(QuarantineState::Unquarantined, "not quarantined", 0);
        };

        if let ReleaseTrigger::Timer(token_id) = trigger {
            if record.release_timer.as_ref().map(ReleaseToken::id) != Some(token_id) {
                tracing::debug!(guild_id, user_id, token_id, "Ignoring superseded auto-release timer");
                return QuarantineOutcome::ok(
                    QuarantineState::Quarantined,
                    "superseded auto-release ignored",
                    0,
                );
            }
        }

        self.transitions.insert(key, QuarantineState::Releasing);
        let outcome = self.release_locked(record).await;
        self.transitions.remove(&key);
        outcome
    }

    async fn release_locked(&self, record: QuarantineRecord) -> QuarantineOutcome {
        let guild_id = record.guild_id;
        let user_id = record.user_id;
        let quarantine_role_id = record.quarantine_role_id;

        let (existing, managed) = match self.call(self.roles.guild_roles(guild_id)).await {
            Ok(roles) => (
                Some(roles.iter().map(|r| r.id).collect::<BTreeSet<u64>>()),
                roles
                    .iter()
                    .filter(|r| r.managed)
                    .map(|r| r.id)
                    .collect::<BTreeSet<u64>>(),
            ),
            Err(e) => {
                tracing::warn!(guild_id, "Could not list guild roles, restoring all saved roles: {}", e);
                (None, BTreeSet::new())
            }
        };

        let valid_roles: BTreeSet<u64> = record
            .original_role_ids
            .iter()
            .copied()
            .filter(|id| existing.as_ref().map_or(true, |ids| ids.contains(id)))
            .filter(|id| !managed.contains(id))
            .collect();

        if let Err(RoleApiError::MemberNotFound) = self
            .restore_roles(guild_id, user_id, quarantine_role_id, &valid_roles)
            .await
        {
            return self.defer_release(record).await;
        }

        let (verified, attempts) = self
            .verify_release(guild_id, user_id, quarantine_role_id, &valid_roles)
            .await;

        if let Some(timer) = &record.release_timer {
            timer.cancel();
        }
        self.records.remove(&(guild_id, user_id));
        if let Err(e) = self.store.delete(user_id, guild_id).await {
            self.report_durability_gap(guild_id, user_id, "delete", &e)
                .await;
        }
        self.ledger.set_quarantined(guild_id, user_id, false);

        let dropped = record.original_role_ids.len() - valid_roles.len();
        if verified {
            tracing::info!(guild_id, user_id, restored = valid_roles.len(), dropped, "Member released");
            let details = format!("restored {} role(s)", valid_roles.len());
            self.notify(guild_id, NotificationKind::Released, user_id, &details)
                .await;
            QuarantineOutcome::ok(QuarantineState::Unquarantined, "released", attempts)
        } else {
            tracing::warn!(guild_id, user_id, attempts, "Released, but role state could not be verified");
            self.notify(
                guild_id,
                NotificationKind::ReleaseUnverified,
                user_id,
                "roles may be incomplete; check the member manually",
            )
            .await;
            QuarantineOutcome::ok(
                QuarantineState::Unquarantined,
                "released without verification",
                attempts,
            )
        }
    }

    /// Keep the record of a member who is gone, marked due, so the release finishes
    /// on rejoin. A fired or pending timer is dropped; nothing re-arms it.
    async fn defer_release(&self, mut record: QuarantineRecord) -> QuarantineOutcome {
        let guild_id = record.guild_id;
        let user_id = record.user_id;
        let now = Utc::now();

        if let Some(timer) = record.release_timer.take() {
            timer.cancel();
        }
        record.release_at = Some(record.release_at.map_or(now, |at| at.min(now)));

        if let Err(e) = self.store.save(&record).await {
            self.report_durability_gap(guild_id, user_id, "save", &e)
                .await;
        }
        self.records.insert((guild_id, user_id), record);

        tracing::info!(guild_id, user_id, "Member left before release; releasing when they rejoin");
        QuarantineOutcome::failed(
            QuarantineState::ReleaseFailed,
            "member is not in the guild; roles come back when they rejoin",
            0,
        )
    }

    /// Atomic replace, then remove-and-add in bulk, then one role at a time.
    /// Only a missing member is reported back; everything else is best effort.
    async fn restore_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        quarantine_role_id: u64,
        valid_roles: &BTreeSet<u64>,
    ) -> Result<(), RoleApiError> {
        match self
            .call(self.roles.set_roles(guild_id, user_id, valid_roles, RELEASE_REASON))
            .await
        {
            Ok(()) => return Ok(()),
            Err(RoleApiError::MemberNotFound) => return Err(RoleApiError::MemberNotFound),
            Err(e) => tracing::warn!(guild_id, user_id, "Atomic restore failed, falling back: {}", e),
        }

        match self
            .call(
                self.roles
                    .remove_roles(guild_id, user_id, &[quarantine_role_id], RELEASE_REASON),
            )
            .await
        {
            Ok(()) => {}
            Err(RoleApiError::MemberNotFound) => return Err(RoleApiError::MemberNotFound),
            Err(e) => tracing::warn!(guild_id, user_id, "Could not remove quarantine role: {}", e),
        }

        self.sleeper.sleep(self.settings.release_step_delay).await;

        let roles: Vec<u64> = valid_roles.iter().copied().collect();
        if roles.is_empty() {
            return Ok(());
        }

        match self
            .call(self.roles.add_roles(guild_id, user_id, &roles, RELEASE_REASON))
            .await
        {
            Ok(()) => Ok(()),
            Err(RoleApiError::MemberNotFound) => Err(RoleApiError::MemberNotFound),
            Err(e) => {
                tracing::warn!(guild_id, user_id, "Bulk role restore failed, adding one by one: {}", e);
                for role_id in roles {
                    match self
                        .call(self.roles.add_roles(guild_id, user_id, &[role_id], RELEASE_REASON))
                        .await
                    {
                        Ok(()) => {}
                        Err(RoleApiError::MemberNotFound) => return Err(RoleApiError::MemberNotFound),
                        Err(e) => tracing::warn!(guild_id, user_id, role_id, "Could not restore role: {}", e),
                    }
                }
                Ok(())
            }
        }
    }

    /// Re-fetch and compare, correcting in between. Returns (verified, attempts used).
    async fn verify_release(
        &self,
        guild_id: u64,
        user_id: u64,
        quarantine_role_id: u64,
        valid_roles: &BTreeSet<u64>,
    ) -> (bool, u32) {
        let max_attempts = self.settings.release_verify_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.call(self.roles.fetch_member(guild_id, user_id)).await {
                Ok(member) => {
                    let still_quarantined = member.role_ids.contains(&quarantine_role_id);
                    let missing: Vec<u64> = valid_roles.difference(&member.role_ids).copied().collect();
                    if !still_quarantined && missing.is_empty() {
                        return (true, attempt);
                    }

                    tracing::debug!(guild_id, user_id, attempt, still_quarantined, missing = missing.len(), "Release verification mismatch");
                    if still_quarantined {
                        if let Err(e) = self
                            .call(self.roles.remove_roles(guild_id, user_id, &[quarantine_role_id], RELEASE_REASON))
                            .await
                        {
                            tracing::warn!(guild_id, user_id, "Correction failed: {}", e);
                        }
                    }
                    if !missing.is_empty() {
                        if let Err(e) = self
                            .call(self.roles.add_roles(guild_id, user_id, &missing, RELEASE_REASON))
                            .await
                        {
                            tracing::warn!(guild_id, user_id, "Correction failed: {}", e);
                        }
                    }
                }
                Err(RoleApiError::MemberNotFound) => return (false, attempt),
                Err(e) => tracing::warn!(guild_id, user_id, attempt, "Release verification fetch failed: {}", e),
            }

            if attempt < max_attempts {
                self.sleeper.sleep(self.settings.release_verify_delay).await;
            }
        }

        (false, max_attempts)
    }

    // ------------------------------------------------------------------------
    // Drift and restart
    // ------------------------------------------------------------------------

    /// Correct a quarantined member whose roles changed out-of-band.
    ///
    /// `observed_roles` only decides whether to look closer; the member is
    /// re-fetched under the lock before anything is changed. Returns None when
    /// there was nothing to do.
    pub async fn enforce(
        &self,
        guild_id: u64,
        user_id: u64,
        observed_roles: &BTreeSet<u64>,
    ) -> Option<QuarantineOutcome> {
        let key = (guild_id, user_id);
        let quarantine_role_id = self.records.get(&key)?.quarantine_role_id;
        if observed_roles.len() == 1 && observed_roles.contains(&quarantine_role_id) {
            return None;
        }

        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        let quarantine_role_id = self.records.get(&key)?.quarantine_role_id;
        self.enforce_locked(guild_id, user_id, quarantine_role_id)
            .await
    }

    async fn enforce_locked(
        &self,
        guild_id: u64,
        user_id: u64,
        quarantine_role_id: u64,
    ) -> Option<QuarantineOutcome> {
        let managed = self.managed_roles(guild_id).await;
        match self
            .verify_quarantined(guild_id, user_id, quarantine_role_id, &managed)
            .await
        {
            Ok(true) | Err(RoleApiError::MemberNotFound) => return None,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(guild_id, user_id, "Could not check quarantine drift: {}", e);
                return None;
            }
        }

        tracing::warn!(guild_id, user_id, "Quarantined member's roles changed out-of-band, correcting");
        let outcome = match self
            .apply_quarantine_roles(
                guild_id,
                user_id,
                quarantine_role_id,
                &managed,
                "Anti-nuke quarantine: drift correction",
            )
            .await
        {
            Ok(true) => {
                self.notify(guild_id, NotificationKind::DriftCorrected, user_id, "roles reset to quarantine")
                    .await;
                QuarantineOutcome::ok(QuarantineState::Quarantined, "drift corrected", 1)
            }
            Ok(false) => {
                self.failed_drift(guild_id, user_id, "roles still differ after correction".to_string())
                    .await
            }
            Err(e) => self.failed_drift(guild_id, user_id, e.to_string()).await,
        };
        Some(outcome)
    }

    async fn failed_drift(&self, guild_id: u64, user_id: u64, reason: String) -> QuarantineOutcome {
        let reason = format!("drift correction failed: {reason}");
        self.notify(guild_id, NotificationKind::QuarantineFailed, user_id, &reason)
            .await;
        QuarantineOutcome::failed(QuarantineState::Quarantined, reason, 1)
    }

    /// Pick a quarantine back up when its member rejoins.
    ///
    /// A release that came due while they were away runs now. Otherwise the
    /// auto-release timer is re-armed for the time left, and the quarantine role
    /// is put back if the rejoin did not restore it. None when the member is
    /// not quarantined or nothing had to change.
    pub async fn resume_after_rejoin(self: &Arc<Self>, guild_id: u64, user_id: u64) -> Option<QuarantineOutcome> {
        let key = (guild_id, user_id);
        if !self.records.contains_key(&key) {
            return None;
        }

        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        let mut record = self.records.get(&key).map(|r| r.clone())?;
        let now = Utc::now();
        let due = record.release_at;

        match due {
            Some(release_at) if release_at <= now => {
                self.transitions.insert(key, QuarantineState::Releasing);
                let outcome = self.release_locked(record).await;
                self.transitions.remove(&key);
                return Some(outcome);
            }
            Some(release_at) => {
                let delay = (release_at - now).to_std().unwrap_or(Duration::ZERO);
                let timer = self.arm_release_timer(guild_id, user_id, delay);
                if let Some(previous) = record.release_timer.replace(timer) {
                    previous.cancel();
                }
                self.records.insert(key, record.clone());
            }
            None => {}
        }

        self.enforce_locked(guild_id, user_id, record.quarantine_role_id)
            .await
    }

    /// Rebuild in-memory records for a guild from the store and re-arm timers.
    /// Deadlines that passed while the bot was down release right away.
    pub async fn restore_guild(self: &Arc<Self>, guild_id: u64) -> Result<usize, StoreError> {
        let stored = self.store.list_by_guild(guild_id).await?;
        let now = Utc::now();
        let mut restored = 0;

        for mut record in stored {
            let key = (record.guild_id, record.user_id);
            let lock = self.lock_for(key);
            let _guard = lock.lock().await;

            if self.records.contains_key(&key) {
                continue;
            }

            if let Some(release_at) = record.release_at {
                let delay = (release_at - now).to_std().unwrap_or(Duration::ZERO);
                record.release_timer = Some(self.arm_release_timer(record.guild_id, record.user_id, delay));
            }

            self.ledger.set_quarantined(record.guild_id, record.user_id, true);
            self.records.insert(key, record);
            restored += 1;
        }

        tracing::info!(guild_id, restored, "Restored quarantine records");
        Ok(restored)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn lock_for(&self, key: (u64, u64)) -> Arc<Mutex<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, RoleApiError>>,
    ) -> Result<T, RoleApiError> {
        bounded_call(self.settings.role_call_timeout, request).await
    }

    async fn managed_roles(&self, guild_id: u64) -> BTreeSet<u64> {
        match self.call(self.roles.guild_roles(guild_id)).await {
            Ok(roles) => roles.into_iter().filter(|r| r.managed).map(|r| r.id).collect(),
            Err(e) => {
                tracing::warn!(guild_id, "Could not list guild roles: {}", e);
                BTreeSet::new()
            }
        }
    }

    async fn notify(&self, guild_id: u64, kind: NotificationKind, user_id: u64, details: &str) {
        if let Err(e) = self.notifier.notify(guild_id, kind, user_id, details).await {
            tracing::warn!(guild_id, user_id, ?kind, "Dropping notification: {}", e);
        }
    }

    async fn report_durability_gap(&self, guild_id: u64, user_id: u64, op: &str, error: &StoreError) {
        tracing::warn!(guild_id, user_id, op, "Quarantine store write failed: {}", error);
        let details = format!("store {op} failed ({error}); state will not survive a restart");
        self.notify(guild_id, NotificationKind::DurabilityWarning, user_id, &details)
            .await;
    }
}
