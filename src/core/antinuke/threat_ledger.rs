// Threat ledger - per-actor, per-category sliding-window event counters.
//
// Each (guild_id, actor_id) owns one ActorThreatRecord. DashMap's entry locking
// serializes updates for the same actor without a global lock.

use super::antinuke_models::ActionCategory;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// Counters and flags for one actor in one guild.
#[derive(Debug, Clone, Default)]
pub struct ActorThreatRecord {
    /// Oldest-first, non-decreasing timestamps per category.
    events: HashMap<ActionCategory, VecDeque<DateTime<Utc>>>,
    /// Categories whose threshold already fired in the current window.
    tripped: HashSet<ActionCategory>,
    /// Only ever grows.
    pub threat_level: u32,
    pub quarantined: bool,
}

#[cfg(test)]
impl ActorThreatRecord {
    pub fn timestamps(&self, category: ActionCategory) -> Vec<DateTime<Utc>> {
        self.events
            .get(&category)
            .map(|seq| seq.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Left-trim everything older than `now - window_secs`.
fn prune(seq: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window_secs: u64) {
    let cutoff = now - Duration::seconds(window_secs.min(i64::MAX as u64) as i64);
    while seq.front().is_some_and(|oldest| *oldest < cutoff) {
        seq.pop_front();
    }
}

#[derive(Debug, Default)]
pub struct ThreatLedger {
    records: DashMap<(u64, u64), ActorThreatRecord>,
}

impl ThreatLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Append an event, prune the category's window and run the first-crossing
    /// latch, all under the actor's entry lock. Returns (pruned count, fired).
    ///
    /// Late (out-of-order) timestamps are inserted in place so the sequence stays
    /// ordered; pruning is relative to the newest timestamp seen. `fired` is true
    /// only for the first observation of `count >= max_count` since the count was
    /// last below the threshold. A `max_count` of 0 never fires.
    pub fn record_and_latch(
        &self,
        guild_id: u64,
        actor_id: u64,
        category: ActionCategory,
        timestamp: DateTime<Utc>,
        window_secs: u64,
        max_count: u32,
    ) -> (usize, bool) {
        let mut record = self.records.entry((guild_id, actor_id)).or_default();
        let seq = record.events.entry(category).or_default();

        let position = seq.partition_point(|existing| *existing <= timestamp);
        seq.insert(position, timestamp);

        let newest = seq.back().copied().unwrap_or(timestamp);
        prune(seq, newest, window_secs);
        let count = seq.len();

        if max_count == 0 {
            return (count, false);
        }
        if count < max_count as usize {
            record.tripped.remove(&category);
            return (count, false);
        }
        (count, record.tripped.insert(category))
    }

    /// Number of events still inside the window at `now`.
    pub fn count_in_window(
        &self,
        guild_id: u64,
        actor_id: u64,
        category: ActionCategory,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(mut record) = self.records.get_mut(&(guild_id, actor_id)) else {
            return 0;
        };
        let Some(seq) = record.events.get_mut(&category) else {
            return 0;
        };
        prune(seq, now, window_secs);
        seq.len()
    }

    /// Add threat points. Returns the new level.
    pub fn add_threat(&self, guild_id: u64, actor_id: u64, points: u32) -> u32 {
        let mut record = self.records.entry((guild_id, actor_id)).or_default();
        record.threat_level = record.threat_level.saturating_add(points);
        record.threat_level
    }

    pub fn threat_level(&self, guild_id: u64, actor_id: u64) -> u32 {
        self.records
            .get(&(guild_id, actor_id))
            .map(|r| r.threat_level)
            .unwrap_or(0)
    }

    pub fn set_quarantined(&self, guild_id: u64, actor_id: u64, quarantined: bool) {
        self.records
            .entry((guild_id, actor_id))
            .or_default()
            .quarantined = quarantined;
    }

    pub fn is_quarantined(&self, guild_id: u64, actor_id: u64) -> bool {
        self.records
            .get(&(guild_id, actor_id))
            .map(|r| r.quarantined)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn snapshot(&self, guild_id: u64, actor_id: u64) -> Option<ActorThreatRecord> {
        self.records.get(&(guild_id, actor_id)).map(|r| r.clone())
    }
}
