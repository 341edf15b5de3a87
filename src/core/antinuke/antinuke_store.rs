// Storage ports for the anti-nuke engine.
//
// Following the same pattern as the other stores: the core defines what it needs,
// the infra layer provides SQLite and in-memory implementations.

use super::antinuke_models::{
    ConfigBackup, ConfigBackupData, GuildSecurityConfig, QuarantineRecord, RoleBackupSnapshot,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable quarantine state, so quarantines survive a restart.
#[async_trait]
pub trait QuarantineStore: Send + Sync {
    /// Insert or replace the record for (user_id, guild_id).
    async fn save(&self, record: &QuarantineRecord) -> Result<(), StoreError>;

    async fn get(&self, user_id: u64, guild_id: u64)
        -> Result<Option<QuarantineRecord>, StoreError>;

    async fn delete(&self, user_id: u64, guild_id: u64) -> Result<(), StoreError>;

    async fn list_by_guild(&self, guild_id: u64) -> Result<Vec<QuarantineRecord>, StoreError>;
}

/// Roles remembered across leave/rejoin.
#[async_trait]
pub trait RoleBackupStore: Send + Sync {
    /// Overwrites any earlier snapshot for the same member.
    async fn save_backup(&self, snapshot: &RoleBackupSnapshot) -> Result<(), StoreError>;

    /// Get-and-delete.
    async fn take_backup(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<RoleBackupSnapshot>, StoreError>;
}

/// Per-guild configuration and the word blacklist.
#[async_trait]
pub trait GuildConfigStore: Send + Sync {
    async fn get_config(&self, guild_id: u64) -> Result<Option<GuildSecurityConfig>, StoreError>;

    async fn save_config(&self, config: &GuildSecurityConfig) -> Result<(), StoreError>;

    async fn list_configs(&self) -> Result<Vec<GuildSecurityConfig>, StoreError>;

    /// Returns false if the word was already present.
    async fn add_blacklisted_word(&self, word: &str) -> Result<bool, StoreError>;

    /// Returns false if the word was not present.
    async fn remove_blacklisted_word(&self, word: &str) -> Result<bool, StoreError>;

    async fn blacklisted_words(&self) -> Result<Vec<String>, StoreError>;
}

/// Point-in-time copies of a guild's settings, kept for manual recovery.
#[async_trait]
pub trait ConfigBackupStore: Send + Sync {
    /// Stores a new backup and returns it with its assigned id.
    async fn create_backup(
        &self,
        guild_id: u64,
        data: &ConfigBackupData,
    ) -> Result<ConfigBackup, StoreError>;

    /// Newest first, at most `limit` entries.
    async fn list_backups(&self, guild_id: u64, limit: u32)
        -> Result<Vec<ConfigBackup>, StoreError>;
}
