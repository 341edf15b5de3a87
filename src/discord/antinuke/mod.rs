// Discord adapters for the anti-nuke engine.

pub mod commands;
pub mod events;
pub mod log_notifier;
pub mod serenity_roles;

pub use log_notifier::LogChannelNotifier;
pub use serenity_roles::SerenityRoleService;
