// In-memory implementation of the anti-nuke stores.
//
// Test double for the SQLite store: same ports, nothing survives a restart.
// Only compiled for tests.

use crate::core::antinuke::{
    ConfigBackup, ConfigBackupData, ConfigBackupStore, GuildConfigStore, GuildSecurityConfig,
    QuarantineRecord, QuarantineStore, RoleBackupSnapshot, RoleBackupStore, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicI64, Ordering};

/// Keys are (user_id, guild_id), matching the SQLite primary keys.
#[derive(Default)]
pub struct InMemoryAntiNukeStore {
    quarantines: DashMap<(u64, u64), QuarantineRecord>,
    backups: DashMap<(u64, u64), RoleBackupSnapshot>,
    configs: DashMap<u64, GuildSecurityConfig>,
    blacklist: DashSet<String>,
    config_backups: DashMap<u64, Vec<ConfigBackup>>,
    next_backup_id: AtomicI64,
}

impl InMemoryAntiNukeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuarantineStore for InMemoryAntiNukeStore {
    async fn save(&self, record: &QuarantineRecord) -> Result<(), StoreError> {
        // Timers are runtime-only; only the deadline is durable.
        let mut stored = record.clone();
        stored.release_timer = None;
        self.quarantines
            .insert((record.user_id, record.guild_id), stored);
        Ok(())
    }

    async fn get(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<QuarantineRecord>, StoreError> {
        Ok(self
            .quarantines
            .get(&(user_id, guild_id))
            .map(|r| r.clone()))
    }

    async fn delete(&self, user_id: u64, guild_id: u64) -> Result<(), StoreError> {
        self.quarantines.remove(&(user_id, guild_id));
        Ok(())
    }

    async fn list_by_guild(&self, guild_id: u64) -> Result<Vec<QuarantineRecord>, StoreError> {
        let mut records: Vec<QuarantineRecord> = self
            .quarantines
            .iter()
            .filter(|entry| entry.guild_id == guild_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.quarantine_time);
        Ok(records)
    }
}

#[async_trait]
impl RoleBackupStore for InMemoryAntiNukeStore {
    async fn save_backup(&self, snapshot: &RoleBackupSnapshot) -> Result<(), StoreError> {
        self.backups
            .insert((snapshot.user_id, snapshot.guild_id), snapshot.clone());
        Ok(())
    }

    async fn take_backup(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<RoleBackupSnapshot>, StoreError> {
        Ok(self
            .backups
            .remove(&(user_id, guild_id))
            .map(|(_, snapshot)| snapshot))
    }
}

#[async_trait]
impl GuildConfigStore for InMemoryAntiNukeStore {
    async fn get_config(&self, guild_id: u64) -> Result<Option<GuildSecurityConfig>, StoreError> {
        Ok(self.configs.get(&guild_id).map(|c| c.clone()))
    }

    async fn save_config(&self, config: &GuildSecurityConfig) -> Result<(), StoreError> {
        self.configs.insert(config.guild_id, config.clone());
        Ok(())
    }

    async fn list_configs(&self) -> Result<Vec<GuildSecurityConfig>, StoreError> {
        let mut configs: Vec<GuildSecurityConfig> =
            self.configs.iter().map(|c| c.value().clone()).collect();
        configs.sort_by_key(|c| c.guild_id);
        Ok(configs)
    }

    async fn add_blacklisted_word(&self, word: &str) -> Result<bool, StoreError> {
        Ok(self.blacklist.insert(word.to_lowercase()))
    }

    async fn remove_blacklisted_word(&self, word: &str) -> Result<bool, StoreError> {
        Ok(self.blacklist.remove(&word.to_lowercase()).is_some())
    }

    async fn blacklisted_words(&self) -> Result<Vec<String>, StoreError> {
        let mut words: Vec<String> = self.blacklist.iter().map(|w| w.clone()).collect();
        words.sort();
        Ok(words)
    }
}

#[async_trait]
impl ConfigBackupStore for InMemoryAntiNukeStore {
    async fn create_backup(
        &self,
        guild_id: u64,
        data: &ConfigBackupData,
    ) -> Result<ConfigBackup, StoreError> {
        let backup = ConfigBackup {
            id: self.next_backup_id.fetch_add(1, Ordering::SeqCst) + 1,
            guild_id,
            created_at: Utc::now(),
            data: data.clone(),
        };
        self.config_backups
            .entry(guild_id)
            .or_default()
            .push(backup.clone());
        Ok(backup)
    }

    async fn list_backups(
        &self,
        guild_id: u64,
        limit: u32,
    ) -> Result<Vec<ConfigBackup>, StoreError> {
        Ok(self
            .config_backups
            .get(&guild_id)
            .map(|backups| {
                backups
                    .iter()
                    .rev()
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::antinuke::ReleaseScheduler;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn record(user_id: u64, guild_id: u64) -> QuarantineRecord {
        QuarantineRecord {
            user_id,
            guild_id,
            original_role_ids: BTreeSet::from([10, 11]),
            quarantine_role_id: 50,
            reason: "test".to_string(),
            quarantine_time: Utc::now(),
            release_at: None,
            release_timer: None,
        }
    }

    #[tokio::test]
    async fn test_quarantine_save_get_delete() {
        let store = InMemoryAntiNukeStore::new();
        store.save(&record(7, 100)).await.unwrap();
        store.save(&record(8, 100)).await.unwrap();
        store.save(&record(7, 200)).await.unwrap();

        assert_eq!(store.list_by_guild(100).await.unwrap().len(), 2);
        assert!(store.get(7, 200).await.unwrap().is_some());

        store.delete(7, 100).await.unwrap();
        assert!(store.get(7, 100).await.unwrap().is_none());
        assert_eq!(store.list_by_guild(100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_saved_record_drops_timer() {
        let store = InMemoryAntiNukeStore::new();
        let scheduler = ReleaseScheduler::new();
        let mut quarantined = record(7, 100);
        quarantined.release_timer = Some(scheduler.arm(Duration::from_secs(60), |_| async {}));

        store.save(&quarantined).await.unwrap();
        assert!(store.get(7, 100).await.unwrap().unwrap().release_timer.is_none());
    }

    #[tokio::test]
    async fn test_backup_take_is_single_use() {
        let store = InMemoryAntiNukeStore::new();
        let snapshot = RoleBackupSnapshot {
            user_id: 7,
            guild_id: 100,
            role_ids: BTreeSet::from([10]),
            timestamp: Utc::now(),
        };
        store.save_backup(&snapshot).await.unwrap();

        assert_eq!(store.take_backup(7, 100).await.unwrap(), Some(snapshot));
        assert!(store.take_backup(7, 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blacklist_is_case_insensitive() {
        let store = InMemoryAntiNukeStore::new();
        assert!(store.add_blacklisted_word("Raid").await.unwrap());
        assert!(!store.add_blacklisted_word("raid").await.unwrap());
        assert_eq!(store.blacklisted_words().await.unwrap(), vec!["raid"]);
        assert!(store.remove_blacklisted_word("RAID").await.unwrap());
        assert!(!store.remove_blacklisted_word("raid").await.unwrap());
    }
}
