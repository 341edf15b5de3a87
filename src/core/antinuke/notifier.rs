// Notification port. Fire-and-forget: the engine logs failures and moves on.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Quarantined,
    QuarantineFailed,
    Released,
    ReleaseUnverified,
    Bypassed,
    PunishmentApplied,
    PunishmentFailed,
    DurabilityWarning,
    DriftCorrected,
    RolesRestored,
}

impl NotificationKind {
    pub fn title(&self) -> &'static str {
        match self {
            NotificationKind::Quarantined => "Member quarantined",
            NotificationKind::QuarantineFailed => "Quarantine failed",
            NotificationKind::Released => "Member released",
            NotificationKind::ReleaseUnverified => "Release could not be verified",
            NotificationKind::Bypassed => "Punishment bypassed",
            NotificationKind::PunishmentApplied => "Punishment applied",
            NotificationKind::PunishmentFailed => "Punishment failed",
            NotificationKind::DurabilityWarning => "Quarantine state not persisted",
            NotificationKind::DriftCorrected => "Quarantine drift corrected",
            NotificationKind::RolesRestored => "Roles restored",
        }
    }

    /// Whether operators should treat this as a problem.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            NotificationKind::QuarantineFailed
                | NotificationKind::ReleaseUnverified
                | NotificationKind::PunishmentFailed
                | NotificationKind::DurabilityWarning
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        guild_id: u64,
        kind: NotificationKind,
        user_id: u64,
        details: &str,
    ) -> Result<(), NotifyError>;
}
