// Core anti-nuke module - threat detection, bypass decisions and quarantine.
//
// Platform-agnostic: ids are plain u64s, and everything that talks to the outside
// world (roles, storage, notifications) is a port implemented in infra/ or discord/.

pub mod antinuke_models;
pub mod antinuke_service;
pub mod antinuke_store;
pub mod bypass_arbiter;
pub mod member_roles;
pub mod notifier;
pub mod policy_evaluator;
pub mod quarantine_controller;
pub mod release_scheduler;
pub mod retry;
pub mod role_backup;
pub mod threat_ledger;

#[cfg(test)]
pub mod test_support;

pub use antinuke_models::*;
pub use antinuke_service::*;
pub use antinuke_store::*;
pub use bypass_arbiter::{BypassArbiter, TierPolicy, TierRule};
pub use member_roles::*;
pub use notifier::*;
pub use quarantine_controller::{QuarantineController, QuarantineSettings};
pub use release_scheduler::{ReleaseScheduler, ReleaseToken};
pub use retry::{Sleeper, TokioSleeper};
