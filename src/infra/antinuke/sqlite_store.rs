// SQLite-backed anti-nuke store.
//
// Tables:
// - guild_security_config: Per-guild settings, thresholds as a JSON policy blob
// - quarantined_users: Active quarantines with the roles to give back
// - role_backups: Roles of members who left, restored on rejoin
// - blacklisted_words: Words that trigger content violations (lower-case)
// - config_backups: JSON snapshots of a guild's settings, blacklist and quarantines

use crate::core::antinuke::{
    ConfigBackup, ConfigBackupData, ConfigBackupStore, GuildConfigStore, GuildSecurityConfig,
    PolicyConfig, Punishment, QuarantineRecord, QuarantineStore, RoleBackupSnapshot,
    RoleBackupStore, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeSet;

pub struct SqliteAntiNukeStore {
    pool: Pool<Sqlite>,
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteAntiNukeStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guild_security_config (
                guild_id INTEGER PRIMARY KEY,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                quarantine_role_id INTEGER,
                bypass_role_id INTEGER,
                log_channel_id INTEGER,
                default_punishment TEXT NOT NULL DEFAULT 'quarantine',
                policy TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quarantined_users (
                user_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                original_roles TEXT NOT NULL,
                quarantine_role_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                quarantine_time TEXT NOT NULL,
                release_at TEXT,
                PRIMARY KEY (user_id, guild_id)
            );
            CREATE INDEX IF NOT EXISTS idx_quarantined_users_guild
                ON quarantined_users(guild_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS role_backups (
                user_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                roles TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (user_id, guild_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blacklisted_words (
                word TEXT PRIMARY KEY
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config_backups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                backup_data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_config_backups_guild
                ON config_backups(guild_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    fn record_from_row(row: &SqliteRow) -> Result<QuarantineRecord, StoreError> {
        let original_roles: String = row.get("original_roles");
        let quarantine_time: String = row.get("quarantine_time");
        let release_at: Option<String> = row.get("release_at");

        Ok(QuarantineRecord {
            user_id: row.get::<i64, _>("user_id") as u64,
            guild_id: row.get::<i64, _>("guild_id") as u64,
            original_role_ids: serde_json::from_str(&original_roles)?,
            quarantine_role_id: row.get::<i64, _>("quarantine_role_id") as u64,
            reason: row.get("reason"),
            quarantine_time: parse_time(&quarantine_time),
            release_at: release_at.as_deref().map(parse_time),
            release_timer: None,
        })
    }

    fn config_from_row(row: &SqliteRow) -> Result<GuildSecurityConfig, StoreError> {
        let policy_json: String = row.get("policy");
        let mut policy: PolicyConfig = serde_json::from_str(&policy_json)?;
        let punishment: String = row.get("default_punishment");
        policy.default_punishment = punishment.parse().unwrap_or_default();

        Ok(GuildSecurityConfig {
            guild_id: row.get::<i64, _>("guild_id") as u64,
            enabled: row.get("enabled"),
            quarantine_role_id: row
                .get::<Option<i64>, _>("quarantine_role_id")
                .map(|id| id as u64),
            bypass_role_id: row
                .get::<Option<i64>, _>("bypass_role_id")
                .map(|id| id as u64),
            log_channel_id: row
                .get::<Option<i64>, _>("log_channel_id")
                .map(|id| id as u64),
            policy,
        })
    }
}

#[async_trait]
impl QuarantineStore for SqliteAntiNukeStore {
    async fn save(&self, record: &QuarantineRecord) -> Result<(), StoreError> {
        let original_roles = serde_json::to_string(&record.original_role_ids)?;

        sqlx::query(
            r#"
            INSERT INTO quarantined_users (
                user_id, guild_id, original_roles, quarantine_role_id,
                reason, quarantine_time, release_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, guild_id) DO UPDATE SET
                original_roles = excluded.original_roles,
                quarantine_role_id = excluded.quarantine_role_id,
                reason = excluded.reason,
                quarantine_time = excluded.quarantine_time,
                release_at = excluded.release_at
            "#,
        )
        .bind(record.user_id as i64)
        .bind(record.guild_id as i64)
        .bind(&original_roles)
        .bind(record.quarantine_role_id as i64)
        .bind(&record.reason)
        .bind(record.quarantine_time.to_rfc3339())
        .bind(record.release_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<QuarantineRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM quarantined_users WHERE user_id = ? AND guild_id = ?")
            .bind(user_id as i64)
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn delete(&self, user_id: u64, guild_id: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM quarantined_users WHERE user_id = ? AND guild_id = ?")
            .bind(user_id as i64)
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn list_by_guild(&self, guild_id: u64) -> Result<Vec<QuarantineRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM quarantined_users WHERE guild_id = ? ORDER BY quarantine_time",
        )
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(Self::record_from_row).collect()
    }
}

#[async_trait]
impl RoleBackupStore for SqliteAntiNukeStore {
    async fn save_backup(&self, snapshot: &RoleBackupSnapshot) -> Result<(), StoreError> {
        let roles = serde_json::to_string(&snapshot.role_ids)?;

        sqlx::query(
            r#"
            INSERT INTO role_backups (user_id, guild_id, roles, timestamp)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, guild_id) DO UPDATE SET
                roles = excluded.roles,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(snapshot.user_id as i64)
        .bind(snapshot.guild_id as i64)
        .bind(&roles)
        .bind(snapshot.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn take_backup(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<RoleBackupSnapshot>, StoreError> {
        let row = sqlx::query(
            "DELETE FROM role_backups WHERE user_id = ? AND guild_id = ? RETURNING roles, timestamp",
        )
        .bind(user_id as i64)
        .bind(guild_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let roles: String = row.get("roles");
        let timestamp: String = row.get("timestamp");
        let role_ids: BTreeSet<u64> = serde_json::from_str(&roles)?;

        Ok(Some(RoleBackupSnapshot {
            user_id,
            guild_id,
            role_ids,
            timestamp: parse_time(&timestamp),
        }))
    }
}

#[async_trait]
impl GuildConfigStore for SqliteAntiNukeStore {
    async fn get_config(&self, guild_id: u64) -> Result<Option<GuildSecurityConfig>, StoreError> {
        let row = sqlx::query("SELECT * FROM guild_security_config WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::config_from_row).transpose()
    }

    async fn save_config(&self, config: &GuildSecurityConfig) -> Result<(), StoreError> {
        let policy = serde_json::to_string(&config.policy)?;

        sqlx::query(
            r#"
            INSERT INTO guild_security_config (
                guild_id, enabled, quarantine_role_id, bypass_role_id,
                log_channel_id, default_punishment, policy
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                enabled = excluded.enabled,
                quarantine_role_id = excluded.quarantine_role_id,
                bypass_role_id = excluded.bypass_role_id,
                log_channel_id = excluded.log_channel_id,
                default_punishment = excluded.default_punishment,
                policy = excluded.policy
            "#,
        )
        .bind(config.guild_id as i64)
        .bind(config.enabled)
        .bind(config.quarantine_role_id.map(|id| id as i64))
        .bind(config.bypass_role_id.map(|id| id as i64))
        .bind(config.log_channel_id.map(|id| id as i64))
        .bind(config.policy.default_punishment.as_str())
        .bind(&policy)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn list_configs(&self) -> Result<Vec<GuildSecurityConfig>, StoreError> {
        let rows = sqlx::query("SELECT * FROM guild_security_config ORDER BY guild_id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(Self::config_from_row).collect()
    }

    async fn add_blacklisted_word(&self, word: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO blacklisted_words (word) VALUES (?)")
            .bind(word.to_lowercase())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_blacklisted_word(&self, word: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM blacklisted_words WHERE word = ?")
            .bind(word.to_lowercase())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn blacklisted_words(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT word FROM blacklisted_words ORDER BY word")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(|row| row.get("word")).collect())
    }
}

#[async_trait]
impl ConfigBackupStore for SqliteAntiNukeStore {
    async fn create_backup(
        &self,
        guild_id: u64,
        data: &ConfigBackupData,
    ) -> Result<ConfigBackup, StoreError> {
        let backup_data = serde_json::to_string(data)?;
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO config_backups (guild_id, backup_data, created_at) VALUES (?, ?, ?)",
        )
        .bind(guild_id as i64)
        .bind(&backup_data)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(ConfigBackup {
            id: result.last_insert_rowid(),
            guild_id,
            created_at,
            data: data.clone(),
        })
    }

    async fn list_backups(
        &self,
        guild_id: u64,
        limit: u32,
    ) -> Result<Vec<ConfigBackup>, StoreError> {
        // AUTOINCREMENT ids follow insertion order, and unlike the rfc3339
        // text they never tie within the same second.
        let rows = sqlx::query(
            "SELECT * FROM config_backups WHERE guild_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                let backup_data: String = row.get("backup_data");
                let created_at: String = row.get("created_at");
                Ok(ConfigBackup {
                    id: row.get("id"),
                    guild_id,
                    created_at: parse_time(&created_at),
                    data: serde_json::from_str(&backup_data)?,
                })
            })
            .collect()
    }
}
