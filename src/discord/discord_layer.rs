// Discord layer - commands and event handlers.

use crate::core::antinuke::AntiNukeService;
use std::sync::Arc;

#[path = "antinuke/mod.rs"]
pub mod antinuke;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared state handed to every command and event handler.
pub struct Data {
    pub antinuke: Arc<AntiNukeService>,
    /// The bot's own user id; actions it performs are never counted against it.
    pub bot_user_id: u64,
}
