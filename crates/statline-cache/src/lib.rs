//! Cache store contract and the pattern-based invalidator.
//!
//! Invalidation is best-effort by policy: every error here is logged and
//! suppressed at the mutation call sites, so a cache outage can never fail or
//! retry a store write.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use statline_core::DataKind;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "statline-cache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUsage {
    pub entries: u64,
}

/// Key-value cache contract: pattern enumeration, multi-key deletion, whole
/// store flush, and age-based eviction for the advisory sweep.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;
    async fn flush_all(&self) -> Result<u64, CacheError>;
    async fn evict_older_than(&self, age: Duration) -> Result<u64, CacheError>;
    async fn usage(&self) -> Result<CacheUsage, CacheError>;
}

/// Glob match with `*` wildcards, the same dialect the cache key patterns use.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '*' || p[pi] == k[ki]) {
            if p[pi] == '*' {
                star = Some(pi);
                mark = ki;
                pi += 1;
            } else {
                pi += 1;
                ki += 1;
            }
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ki = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Cache key builders shared with the read path, kept together so the
/// invalidator's patterns and the reader's keys cannot drift apart.
pub mod keys {
    use uuid::Uuid;

    pub fn teams_list() -> String {
        "teams:list".into()
    }

    pub fn team(id: Uuid) -> String {
        format!("teams:{id}")
    }

    pub fn team_roster(id: Uuid) -> String {
        format!("teams:{id}:players")
    }

    pub fn player(id: Uuid) -> String {
        format!("players:{id}")
    }

    pub fn players_list(position: &str, team: &str, limit: i64, offset: i64) -> String {
        format!("players:list:pos={position}:team={team}:limit={limit}:offset={offset}")
    }

    pub fn game(id: Uuid) -> String {
        format!("games:{id}")
    }

    pub fn games_list(season: i32, week: i32, limit: i64, offset: i64) -> String {
        format!("games:list:season={season}:week={week}:limit={limit}:offset={offset}")
    }

    pub fn player_stats(player_id: Uuid, season: i32, week: i32) -> String {
        format!("stats:player:{player_id}:season={season}:week={week}")
    }

    pub fn game_stats(game_id: Uuid) -> String {
        format!("stats:game:{game_id}")
    }

    pub fn stats_list(season: i32, week: i32) -> String {
        format!("stats:list:season={season}:week={week}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFamily {
    Players,
    Teams,
    Games,
    Stats,
}

impl ResourceFamily {
    fn pattern(&self) -> &'static str {
        match self {
            ResourceFamily::Players => "players*",
            ResourceFamily::Teams => "teams*",
            ResourceFamily::Games => "games*",
            ResourceFamily::Stats => "stats*",
        }
    }
}

/// A domain mutation mapped onto the cache keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationEvent {
    FlushAll,
    Family(ResourceFamily),
    Player(Uuid),
    Team(Uuid),
    Game(Uuid),
    SeasonWeek { season: i32, week: i32 },
    AfterSync(DataKind),
}

impl InvalidationEvent {
    /// Wildcard patterns covering the entity itself plus the list/aggregate
    /// views known to embed it.
    pub fn patterns(&self) -> Vec<String> {
        match self {
            InvalidationEvent::FlushAll => Vec::new(),
            InvalidationEvent::Family(family) => vec![family.pattern().to_string()],
            InvalidationEvent::Player(id) => vec![
                format!("players:{id}*"),
                "players:list*".to_string(),
                format!("stats:player:{id}*"),
            ],
            InvalidationEvent::Team(id) => vec![
                format!("teams:{id}*"),
                "teams:list*".to_string(),
                format!("players:list:*team={id}*"),
            ],
            InvalidationEvent::Game(id) => vec![
                format!("games:{id}*"),
                "games:list*".to_string(),
                format!("stats:game:{id}*"),
            ],
            InvalidationEvent::SeasonWeek { season, week } => vec![
                format!("games:*season={season}*week={week}*"),
                format!("stats:*season={season}*week={week}*"),
            ],
            InvalidationEvent::AfterSync(kind) => match kind {
                DataKind::Teams => vec!["teams*".to_string()],
                // Roster moves surface in team views too.
                DataKind::Rosters => vec!["players*".to_string(), "teams*".to_string()],
                DataKind::Schedule => vec!["games*".to_string()],
                DataKind::PlayerStats | DataKind::AdvancedStats => {
                    vec!["stats*".to_string(), "games*".to_string()]
                }
                DataKind::Injuries => vec!["players*".to_string(), "injuries*".to_string()],
            },
        }
    }
}

/// Maps mutation events to key patterns and removes matching entries.
#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<dyn CacheStore>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    /// Remove every key the event's patterns match; returns the total removed.
    /// A pattern matching nothing is a zero-count success. A failing pattern
    /// is logged and the remaining patterns still run.
    pub async fn invalidate(&self, event: InvalidationEvent) -> Result<u64, CacheError> {
        if event == InvalidationEvent::FlushAll {
            let removed = self.cache.flush_all().await?;
            info!(removed, "cache flushed");
            return Ok(removed);
        }

        let mut removed = 0u64;
        for pattern in event.patterns() {
            match self.invalidate_pattern(&pattern).await {
                Ok(count) => removed += count,
                Err(err) => warn!(pattern, error = %err, "pattern invalidation failed"),
            }
        }
        info!(?event, removed, "cache invalidated");
        Ok(removed)
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let keys = self.cache.keys_matching(pattern).await?;
        if keys.is_empty() {
            debug!(pattern, "no keys to invalidate");
            return Ok(0);
        }
        self.cache.delete(&keys).await
    }

    /// Advisory housekeeping pass: drop entries older than the retention
    /// threshold. Not correctness-critical; callers log and move on.
    pub async fn sweep(&self, retention: Duration) -> Result<u64, CacheError> {
        let removed = self.cache.evict_older_than(retention).await?;
        if removed > 0 {
            info!(removed, "swept stale cache entries");
        }
        Ok(removed)
    }

    pub async fn usage(&self) -> Result<CacheUsage, CacheError> {
        self.cache.usage().await
    }
}

// ---------------------------------------------------------------------------
// In-memory cache store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

/// Hash-map-backed [`CacheStore`] shared by the read path and tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.entries.write().expect("lock poisoned").insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .expect("lock poisoned")
            .get(key)
            .map(|entry| entry.value.clone())
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.read().expect("lock poisoned");
        Ok(entries
            .keys()
            .filter(|key| pattern_matches(pattern, key))
            .cloned()
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let mut removed = 0u64;
        for key in keys {
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn flush_all(&self) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn evict_older_than(&self, age: Duration) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < age);
        Ok((before - entries.len()) as u64)
    }

    async fn usage(&self) -> Result<CacheUsage, CacheError> {
        Ok(CacheUsage {
            entries: self.entries.read().expect("lock poisoned").len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        assert!(pattern_matches("players*", "players:list:pos=QB"));
        assert!(pattern_matches("players:list:*team=KC*", "players:list:pos=:team=KC:limit=50"));
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("teams:list", "teams:list"));
        assert!(!pattern_matches("teams:list", "teams:list:extra"));
        assert!(!pattern_matches("games*", "stats:game:abc"));
        assert!(pattern_matches("games:*season=2023*week=1*", "games:list:season=2023:week=1:limit=50"));
    }

    fn seeded_cache() -> (Arc<MemoryCache>, Uuid, Uuid) {
        let cache = Arc::new(MemoryCache::new());
        let player_id = Uuid::new_v4();
        let game_id = Uuid::new_v4();
        cache.set(&keys::player(player_id), "{}");
        cache.set(&keys::players_list("QB", "KC", 50, 0), "[]");
        cache.set(&keys::player_stats(player_id, 2023, 1), "{}");
        cache.set(&keys::game(game_id), "{}");
        cache.set(&keys::games_list(2023, 1, 50, 0), "[]");
        cache.set(&keys::teams_list(), "[]");
        (cache, player_id, game_id)
    }

    #[tokio::test]
    async fn invalidating_a_player_removes_its_views() {
        let (cache, player_id, _) = seeded_cache();
        let invalidator = CacheInvalidator::new(cache.clone());

        let removed = invalidator
            .invalidate(InvalidationEvent::Player(player_id))
            .await
            .unwrap();
        // Entity key, players list, and the player's stat views.
        assert_eq!(removed, 3);
        assert!(cache.get(&keys::player(player_id)).is_none());
        assert!(cache.get(&keys::teams_list()).is_some());
    }

    #[tokio::test]
    async fn invalidating_a_team_removes_entity_roster_and_list_views() {
        let cache = Arc::new(MemoryCache::new());
        let team_id = Uuid::new_v4();
        let other_team = Uuid::new_v4();
        cache.set(&keys::team(team_id), "{}");
        cache.set(&keys::team_roster(team_id), "[]");
        cache.set(&keys::teams_list(), "[]");
        cache.set(&keys::players_list("", &team_id.to_string(), 50, 0), "[]");
        cache.set(&keys::team(other_team), "{}");
        let invalidator = CacheInvalidator::new(cache.clone());

        let removed = invalidator
            .invalidate(InvalidationEvent::Team(team_id))
            .await
            .unwrap();
        // Entity key, roster view, teams list, team-filtered player list.
        assert_eq!(removed, 4);
        assert!(cache.get(&keys::team(team_id)).is_none());
        assert!(cache.get(&keys::team(other_team)).is_some());
    }

    #[tokio::test]
    async fn invalidating_a_game_removes_its_stat_views() {
        let (cache, _, game_id) = seeded_cache();
        cache.set(&keys::game_stats(game_id), "{}");
        let invalidator = CacheInvalidator::new(cache.clone());

        let removed = invalidator
            .invalidate(InvalidationEvent::Game(game_id))
            .await
            .unwrap();
        // Entity key, games list, and the game's stat view.
        assert_eq!(removed, 3);
        assert!(cache.get(&keys::game(game_id)).is_none());
        assert!(cache.get(&keys::teams_list()).is_some());
    }

    #[tokio::test]
    async fn family_event_clears_one_namespace_only() {
        let (cache, player_id, _) = seeded_cache();
        let invalidator = CacheInvalidator::new(cache.clone());

        let removed = invalidator
            .invalidate(InvalidationEvent::Family(ResourceFamily::Stats))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get(&keys::player_stats(player_id, 2023, 1)).is_none());
        assert!(cache.get(&keys::games_list(2023, 1, 50, 0)).is_some());
    }

    #[tokio::test]
    async fn zero_matches_is_success_not_error() {
        let cache = Arc::new(MemoryCache::new());
        let invalidator = CacheInvalidator::new(cache);

        let removed = invalidator
            .invalidate(InvalidationEvent::Player(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn season_week_event_hits_games_and_stats() {
        let (cache, _, _) = seeded_cache();
        let invalidator = CacheInvalidator::new(cache.clone());

        let removed = invalidator
            .invalidate(InvalidationEvent::SeasonWeek { season: 2023, week: 1 })
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get(&keys::games_list(2023, 1, 50, 0)).is_none());
    }

    #[tokio::test]
    async fn flush_all_empties_the_store() {
        let (cache, _, _) = seeded_cache();
        let invalidator = CacheInvalidator::new(cache.clone());

        let removed = invalidator.invalidate(InvalidationEvent::FlushAll).await.unwrap();
        assert_eq!(removed, 6);
        assert_eq!(invalidator.usage().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn after_sync_rosters_clears_players_and_teams() {
        let (cache, _, _) = seeded_cache();
        let invalidator = CacheInvalidator::new(cache.clone());

        let removed = invalidator
            .invalidate(InvalidationEvent::AfterSync(DataKind::Rosters))
            .await
            .unwrap();
        // Both player views plus the teams list; game keys untouched.
        assert_eq!(removed, 3);
        assert!(cache.get(&keys::games_list(2023, 1, 50, 0)).is_some());
    }

    #[tokio::test]
    async fn sweep_evicts_only_stale_entries() {
        let (cache, _, _) = seeded_cache();
        let invalidator = CacheInvalidator::new(cache.clone());

        // Everything was just inserted; a generous retention keeps it all.
        assert_eq!(invalidator.sweep(Duration::from_secs(3600)).await.unwrap(), 0);
        // Zero retention treats every entry as stale.
        assert_eq!(invalidator.sweep(Duration::ZERO).await.unwrap(), 6);
    }
}
