//! Relational store contract, Postgres + in-memory implementations, progress
//! tracking, and the natural-key upsert engine.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use statline_core::{
    AdvancedStat, AdvancedStatRow, AdvancedStatType, DataKind, Game, GameStat, ImportProgress,
    ImportStatus, InjuryReport, InjuryRow, Player, PlayerStatRow, RosterRow, ScheduleRow, Team,
    TeamRow,
};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "statline-store";

/// Rows per upsert chunk; bounds per-call overhead on large stat batches.
pub const BATCH_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub teams: i64,
    pub players: i64,
    pub games: i64,
    pub game_stats: i64,
    pub advanced_stats: i64,
    pub injuries: i64,
}

impl EntityCounts {
    pub fn total(&self) -> i64 {
        self.teams + self.players + self.games + self.game_stats + self.advanced_stats + self.injuries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageStatus {
    Missing,
    Incomplete,
    Complete,
}

impl CoverageStatus {
    /// A full regular season has at least 250 games on record.
    pub fn for_game_count(games: i64) -> Self {
        if games == 0 {
            CoverageStatus::Missing
        } else if games < 250 {
            CoverageStatus::Incomplete
        } else {
            CoverageStatus::Complete
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageStatus::Missing => "MISSING",
            CoverageStatus::Incomplete => "INCOMPLETE",
            CoverageStatus::Complete => "COMPLETE",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SeasonCoverage {
    pub season: i32,
    pub games: i64,
    pub status: CoverageStatus,
}

/// Entity-level store contract. Constructed handles are injected into each
/// component so tests substitute [`MemoryStore`] for Postgres.
#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn team_id_by_abbr(&self, abbr: &str) -> Result<Option<Uuid>, StoreError>;
    async fn upsert_team(&self, row: &TeamRow) -> Result<Uuid, StoreError>;

    async fn player_id_by_external(&self, external_id: &str) -> Result<Option<Uuid>, StoreError>;
    async fn upsert_player(
        &self,
        row: &RosterRow,
        team_id: Option<Uuid>,
    ) -> Result<Uuid, StoreError>;

    async fn game_id_by_external(&self, external_id: &str) -> Result<Option<Uuid>, StoreError>;
    async fn upsert_game(
        &self,
        row: &ScheduleRow,
        home_team_id: Uuid,
        away_team_id: Uuid,
    ) -> Result<Uuid, StoreError>;

    async fn upsert_game_stat(&self, player_id: Uuid, row: &PlayerStatRow)
        -> Result<Uuid, StoreError>;
    async fn upsert_advanced_stat(
        &self,
        player_id: Uuid,
        row: &AdvancedStatRow,
    ) -> Result<Uuid, StoreError>;
    async fn upsert_injury(&self, player_id: Uuid, row: &InjuryRow) -> Result<Uuid, StoreError>;

    async fn upsert_progress(&self, progress: &ImportProgress) -> Result<(), StoreError>;
    async fn progress(
        &self,
        season: i32,
        kind: DataKind,
    ) -> Result<Option<ImportProgress>, StoreError>;

    async fn entity_counts(&self) -> Result<EntityCounts, StoreError>;
    async fn season_coverage(
        &self,
        start: i32,
        end: i32,
    ) -> Result<Vec<SeasonCoverage>, StoreError>;
}

// ---------------------------------------------------------------------------
// Progress tracker
// ---------------------------------------------------------------------------

/// Records run state per (season, data kind). Pure bookkeeping: it never
/// inspects business data, and callers serialize calls per key.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn Store>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn mark_started(&self, season: i32, kind: DataKind) -> Result<(), StoreError> {
        self.store
            .upsert_progress(&ImportProgress {
                season,
                data_kind: kind,
                status: ImportStatus::InProgress,
                records_imported: 0,
                started_at: Some(Utc::now()),
                completed_at: None,
                error_message: None,
            })
            .await
    }

    pub async fn mark_completed(
        &self,
        season: i32,
        kind: DataKind,
        records: i64,
    ) -> Result<(), StoreError> {
        let started_at = self
            .store
            .progress(season, kind)
            .await?
            .and_then(|p| p.started_at);
        self.store
            .upsert_progress(&ImportProgress {
                season,
                data_kind: kind,
                status: ImportStatus::Completed,
                records_imported: records,
                started_at,
                completed_at: Some(Utc::now()),
                error_message: None,
            })
            .await
    }

    pub async fn mark_failed(
        &self,
        season: i32,
        kind: DataKind,
        message: &str,
    ) -> Result<(), StoreError> {
        let started_at = self
            .store
            .progress(season, kind)
            .await?
            .and_then(|p| p.started_at);
        self.store
            .upsert_progress(&ImportProgress {
                season,
                data_kind: kind,
                status: ImportStatus::Failed,
                records_imported: 0,
                started_at,
                completed_at: Some(Utc::now()),
                error_message: Some(message.to_string()),
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Upsert engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReason {
    pub key: String,
    pub reason: String,
}

/// Explicit per-batch result: rows applied plus every skip and why, so callers
/// and tests see degraded runs instead of silently shortened counts.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub applied: usize,
    pub skipped: Vec<SkipReason>,
}

impl BatchOutcome {
    fn skip(&mut self, key: &str, reason: String) {
        warn!(key, %reason, "row skipped");
        self.skipped.push(SkipReason {
            key: key.to_string(),
            reason,
        });
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.applied += other.applied;
        self.skipped.extend(other.skipped);
    }
}

/// Natural-key reconciliation of parsed rows into domain entities. Unresolved
/// foreign keys skip the row rather than aborting the batch; re-running the
/// same batch converges to the same entities and surrogate ids.
#[derive(Clone)]
pub struct UpsertEngine {
    store: Arc<dyn Store>,
    dry_run: bool,
    chunk_size: usize,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            dry_run: false,
            chunk_size: BATCH_SIZE,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[cfg(test)]
    fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub async fn upsert_teams(&self, rows: &[TeamRow]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for row in rows {
            if self.dry_run {
                outcome.applied += 1;
                continue;
            }
            match self.store.upsert_team(row).await {
                Ok(_) => outcome.applied += 1,
                Err(err) => outcome.skip(&row.abbreviation, format!("store: {err}")),
            }
        }
        outcome
    }

    pub async fn upsert_rosters(&self, rows: &[RosterRow]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for row in rows {
            if self.dry_run {
                outcome.applied += 1;
                continue;
            }
            let team_id = match self.resolve_team(&row.team_abbr).await {
                Ok(team_id) => team_id,
                Err(reason) => {
                    outcome.skip(&row.player_id, reason);
                    continue;
                }
            };
            match self.store.upsert_player(row, team_id).await {
                Ok(_) => outcome.applied += 1,
                Err(err) => outcome.skip(&row.player_id, format!("store: {err}")),
            }
        }
        outcome
    }

    pub async fn upsert_schedule(&self, rows: &[ScheduleRow]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for row in rows {
            if self.dry_run {
                outcome.applied += 1;
                continue;
            }
            if row.game_date().is_none() {
                outcome.skip(&row.game_id, format!("invalid game date {:?}", row.game_day));
                continue;
            }
            let home = match self.store.team_id_by_abbr(&row.home_team).await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    outcome.skip(&row.game_id, format!("home team {} not found", row.home_team));
                    continue;
                }
                Err(err) => {
                    outcome.skip(&row.game_id, format!("store: {err}"));
                    continue;
                }
            };
            let away = match self.store.team_id_by_abbr(&row.away_team).await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    outcome.skip(&row.game_id, format!("away team {} not found", row.away_team));
                    continue;
                }
                Err(err) => {
                    outcome.skip(&row.game_id, format!("store: {err}"));
                    continue;
                }
            };
            match self.store.upsert_game(row, home, away).await {
                Ok(_) => outcome.applied += 1,
                Err(err) => outcome.skip(&row.game_id, format!("store: {err}")),
            }
        }
        outcome
    }

    pub async fn upsert_player_stats(&self, rows: &[PlayerStatRow]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for chunk in rows.chunks(self.chunk_size) {
            debug!(rows = chunk.len(), "upserting stat chunk");
            for row in chunk {
                if self.dry_run {
                    outcome.applied += 1;
                    continue;
                }
                let player_id = match self.resolve_player(&row.player_id).await {
                    Ok(player_id) => player_id,
                    Err(reason) => {
                        outcome.skip(&row.player_id, reason);
                        continue;
                    }
                };
                match self.store.upsert_game_stat(player_id, row).await {
                    Ok(_) => outcome.applied += 1,
                    Err(err) => outcome.skip(&row.player_id, format!("store: {err}")),
                }
            }
        }
        outcome
    }

    pub async fn upsert_advanced_stats(&self, rows: &[AdvancedStatRow]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for chunk in rows.chunks(self.chunk_size) {
            for row in chunk {
                if self.dry_run {
                    outcome.applied += 1;
                    continue;
                }
                let player_id = match self.resolve_player(&row.player_id).await {
                    Ok(player_id) => player_id,
                    Err(reason) => {
                        outcome.skip(&row.player_id, reason);
                        continue;
                    }
                };
                match self.store.upsert_advanced_stat(player_id, row).await {
                    Ok(_) => outcome.applied += 1,
                    Err(err) => outcome.skip(&row.player_id, format!("store: {err}")),
                }
            }
        }
        outcome
    }

    pub async fn upsert_injuries(&self, rows: &[InjuryRow]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for row in rows {
            if self.dry_run {
                outcome.applied += 1;
                continue;
            }
            let player_id = match self.resolve_player(&row.player_id).await {
                Ok(player_id) => player_id,
                Err(reason) => {
                    outcome.skip(&row.player_id, reason);
                    continue;
                }
            };
            match self.store.upsert_injury(player_id, row).await {
                Ok(_) => outcome.applied += 1,
                Err(err) => outcome.skip(&row.player_id, format!("store: {err}")),
            }
        }
        outcome
    }

    async fn resolve_team(&self, abbr: &str) -> Result<Option<Uuid>, String> {
        if abbr.is_empty() {
            // Free agents carry no team; that is not a referential failure.
            return Ok(None);
        }
        match self.store.team_id_by_abbr(abbr).await {
            Ok(Some(id)) => Ok(Some(id)),
            Ok(None) => Err(format!("team {abbr} not found")),
            Err(err) => Err(format!("store: {err}")),
        }
    }

    async fn resolve_player(&self, external_id: &str) -> Result<Uuid, String> {
        match self.store.player_id_by_external(external_id).await {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(format!("player {external_id} not found")),
            Err(err) => Err(format!("store: {err}")),
        }
    }
}

fn game_status(row: &ScheduleRow) -> &'static str {
    if row.home_score.is_some() && row.away_score.is_some() {
        "final"
    } else {
        "scheduled"
    }
}

// ---------------------------------------------------------------------------
// In-memory store (tests + dry runs against a throwaway target)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    teams: HashMap<String, Team>,
    players: HashMap<String, Player>,
    games: HashMap<String, Game>,
    game_stats: HashMap<(Uuid, i32, i32), GameStat>,
    advanced_stats: HashMap<(Uuid, i32, i32, AdvancedStatType), AdvancedStat>,
    injuries: HashMap<(Uuid, i32, i32), InjuryReport>,
    progress: HashMap<(i32, DataKind), ImportProgress>,
}

/// Hash-map-backed [`Store`]. Natural-key semantics match the Postgres
/// implementation so pipeline tests run without a database.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of progress rows, for uniqueness assertions.
    pub fn progress_rows(&self) -> usize {
        self.inner.read().expect("lock poisoned").progress.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn team_id_by_abbr(&self, abbr: &str) -> Result<Option<Uuid>, StoreError> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner.teams.get(abbr).map(|t| t.id))
    }

    async fn upsert_team(&self, row: &TeamRow) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let now = Utc::now();
        if let Some(team) = inner.teams.get_mut(&row.abbreviation) {
            team.name = row.name.clone();
            team.city = row.city.clone();
            team.updated_at = now;
            return Ok(team.id);
        }
        let team = Team {
            id: Uuid::new_v4(),
            abbreviation: row.abbreviation.clone(),
            name: row.name.clone(),
            city: row.city.clone(),
            conference: row.conference.clone(),
            division: row.division.clone(),
            created_at: now,
            updated_at: now,
        };
        let id = team.id;
        inner.teams.insert(row.abbreviation.clone(), team);
        Ok(id)
    }

    async fn player_id_by_external(&self, external_id: &str) -> Result<Option<Uuid>, StoreError> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner.players.get(external_id).map(|p| p.id))
    }

    async fn upsert_player(
        &self,
        row: &RosterRow,
        team_id: Option<Uuid>,
    ) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let now = Utc::now();
        if let Some(player) = inner.players.get_mut(&row.player_id) {
            player.name = row.full_name.clone();
            player.position = row.position.clone();
            player.team_id = team_id;
            player.jersey_number = row.jersey_number;
            player.status = row.status.clone();
            player.updated_at = now;
            return Ok(player.id);
        }
        let player = Player {
            id: Uuid::new_v4(),
            external_id: row.player_id.clone(),
            name: row.full_name.clone(),
            position: row.position.clone(),
            team_id,
            jersey_number: row.jersey_number,
            status: row.status.clone(),
            created_at: now,
            updated_at: now,
        };
        let id = player.id;
        inner.players.insert(row.player_id.clone(), player);
        Ok(id)
    }

    async fn game_id_by_external(&self, external_id: &str) -> Result<Option<Uuid>, StoreError> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner.games.get(external_id).map(|g| g.id))
    }

    async fn upsert_game(
        &self,
        row: &ScheduleRow,
        home_team_id: Uuid,
        away_team_id: Uuid,
    ) -> Result<Uuid, StoreError> {
        let game_date = row
            .game_date()
            .ok_or_else(|| StoreError::InvalidRow(format!("game date {:?}", row.game_day)))?;
        let mut inner = self.inner.write().expect("lock poisoned");
        let now = Utc::now();
        let status = game_status(row);
        if let Some(game) = inner.games.get_mut(&row.game_id) {
            game.home_score = row.home_score;
            game.away_score = row.away_score;
            game.status = status.into();
            game.updated_at = now;
            return Ok(game.id);
        }
        let game = Game {
            id: Uuid::new_v4(),
            external_id: row.game_id.clone(),
            season: row.season,
            week: row.week,
            game_date,
            home_team_id,
            away_team_id,
            home_score: row.home_score,
            away_score: row.away_score,
            status: status.into(),
            created_at: now,
            updated_at: now,
        };
        let id = game.id;
        inner.games.insert(row.game_id.clone(), game);
        Ok(id)
    }

    async fn upsert_game_stat(
        &self,
        player_id: Uuid,
        row: &PlayerStatRow,
    ) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let now = Utc::now();
        let key = (player_id, row.season, row.week);
        if let Some(stat) = inner.game_stats.get_mut(&key) {
            stat.passing_yards = row.passing_yards;
            stat.passing_tds = row.passing_tds;
            stat.interceptions = row.interceptions;
            stat.rushing_yards = row.rushing_yards;
            stat.rushing_tds = row.rushing_tds;
            stat.receiving_yards = row.receiving_yards;
            stat.receiving_tds = row.receiving_tds;
            stat.receptions = row.receptions;
            stat.targets = row.targets;
            stat.fantasy_points = row.fantasy_points;
            stat.updated_at = now;
            return Ok(stat.id);
        }
        let stat = GameStat {
            id: Uuid::new_v4(),
            player_id,
            season: row.season,
            week: row.week,
            passing_yards: row.passing_yards,
            passing_tds: row.passing_tds,
            interceptions: row.interceptions,
            rushing_yards: row.rushing_yards,
            rushing_tds: row.rushing_tds,
            receiving_yards: row.receiving_yards,
            receiving_tds: row.receiving_tds,
            receptions: row.receptions,
            targets: row.targets,
            fantasy_points: row.fantasy_points,
            created_at: now,
            updated_at: now,
        };
        let id = stat.id;
        inner.game_stats.insert(key, stat);
        Ok(id)
    }

    async fn upsert_advanced_stat(
        &self,
        player_id: Uuid,
        row: &AdvancedStatRow,
    ) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let now = Utc::now();
        let key = (player_id, row.season, row.week, row.stat_type);
        if let Some(stat) = inner.advanced_stats.get_mut(&key) {
            stat.avg_time_to_throw = row.avg_time_to_throw;
            stat.avg_separation = row.avg_separation;
            stat.avg_yards_after_catch = row.avg_yards_after_catch;
            stat.efficiency = row.efficiency;
            stat.updated_at = now;
            return Ok(stat.id);
        }
        let stat = AdvancedStat {
            id: Uuid::new_v4(),
            player_id,
            season: row.season,
            week: row.week,
            stat_type: row.stat_type,
            avg_time_to_throw: row.avg_time_to_throw,
            avg_separation: row.avg_separation,
            avg_yards_after_catch: row.avg_yards_after_catch,
            efficiency: row.efficiency,
            created_at: now,
            updated_at: now,
        };
        let id = stat.id;
        inner.advanced_stats.insert(key, stat);
        Ok(id)
    }

    async fn upsert_injury(&self, player_id: Uuid, row: &InjuryRow) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let now = Utc::now();
        let key = (player_id, row.season, row.week);
        if let Some(report) = inner.injuries.get_mut(&key) {
            report.report_status = row.report_status.clone();
            report.practice_status = row.practice_status.clone();
            report.injury = row.injury.clone();
            report.updated_at = now;
            return Ok(report.id);
        }
        let report = InjuryReport {
            id: Uuid::new_v4(),
            player_id,
            season: row.season,
            week: row.week,
            report_status: row.report_status.clone(),
            practice_status: row.practice_status.clone(),
            injury: row.injury.clone(),
            created_at: now,
            updated_at: now,
        };
        let id = report.id;
        inner.injuries.insert(key, report);
        Ok(id)
    }

    async fn upsert_progress(&self, progress: &ImportProgress) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner
            .progress
            .insert((progress.season, progress.data_kind), progress.clone());
        Ok(())
    }

    async fn progress(
        &self,
        season: i32,
        kind: DataKind,
    ) -> Result<Option<ImportProgress>, StoreError> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner.progress.get(&(season, kind)).cloned())
    }

    async fn entity_counts(&self) -> Result<EntityCounts, StoreError> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(EntityCounts {
            teams: inner.teams.len() as i64,
            players: inner.players.len() as i64,
            games: inner.games.len() as i64,
            game_stats: inner.game_stats.len() as i64,
            advanced_stats: inner.advanced_stats.len() as i64,
            injuries: inner.injuries.len() as i64,
        })
    }

    async fn season_coverage(
        &self,
        start: i32,
        end: i32,
    ) -> Result<Vec<SeasonCoverage>, StoreError> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok((start..=end)
            .map(|season| {
                let games = inner.games.values().filter(|g| g.season == season).count() as i64;
                SeasonCoverage {
                    season,
                    games,
                    status: CoverageStatus::for_game_count(games),
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS teams (
    id UUID PRIMARY KEY,
    abbreviation VARCHAR(8) NOT NULL UNIQUE,
    name VARCHAR(100) NOT NULL,
    city VARCHAR(100) NOT NULL DEFAULT '',
    conference VARCHAR(10) NOT NULL DEFAULT '',
    division VARCHAR(10) NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS players (
    id UUID PRIMARY KEY,
    external_id VARCHAR(50) NOT NULL UNIQUE,
    name VARCHAR(200) NOT NULL,
    position VARCHAR(10) NOT NULL DEFAULT '',
    team_id UUID REFERENCES teams(id),
    jersey_number INT,
    status VARCHAR(30) NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS games (
    id UUID PRIMARY KEY,
    external_id VARCHAR(50) NOT NULL UNIQUE,
    season INT NOT NULL,
    week INT NOT NULL,
    game_date DATE NOT NULL,
    home_team_id UUID NOT NULL REFERENCES teams(id),
    away_team_id UUID NOT NULL REFERENCES teams(id),
    home_score INT,
    away_score INT,
    status VARCHAR(20) NOT NULL DEFAULT 'scheduled',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS game_stats (
    id UUID PRIMARY KEY,
    player_id UUID NOT NULL REFERENCES players(id),
    season INT NOT NULL,
    week INT NOT NULL,
    passing_yards DOUBLE PRECISION NOT NULL DEFAULT 0,
    passing_tds INT NOT NULL DEFAULT 0,
    interceptions INT NOT NULL DEFAULT 0,
    rushing_yards DOUBLE PRECISION NOT NULL DEFAULT 0,
    rushing_tds INT NOT NULL DEFAULT 0,
    receiving_yards DOUBLE PRECISION NOT NULL DEFAULT 0,
    receiving_tds INT NOT NULL DEFAULT 0,
    receptions INT NOT NULL DEFAULT 0,
    targets INT NOT NULL DEFAULT 0,
    fantasy_points DOUBLE PRECISION NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE(player_id, season, week)
);
CREATE TABLE IF NOT EXISTS advanced_stats (
    id UUID PRIMARY KEY,
    player_id UUID NOT NULL REFERENCES players(id),
    season INT NOT NULL,
    week INT NOT NULL,
    stat_type VARCHAR(20) NOT NULL,
    avg_time_to_throw DOUBLE PRECISION,
    avg_separation DOUBLE PRECISION,
    avg_yards_after_catch DOUBLE PRECISION,
    efficiency DOUBLE PRECISION,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE(player_id, season, week, stat_type)
);
CREATE TABLE IF NOT EXISTS injury_reports (
    id UUID PRIMARY KEY,
    player_id UUID NOT NULL REFERENCES players(id),
    season INT NOT NULL,
    week INT NOT NULL,
    report_status VARCHAR(30) NOT NULL DEFAULT '',
    practice_status VARCHAR(50),
    injury VARCHAR(100),
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE(player_id, season, week)
);
CREATE TABLE IF NOT EXISTS import_progress (
    season INT NOT NULL,
    data_kind VARCHAR(50) NOT NULL,
    status VARCHAR(20) NOT NULL,
    records_imported BIGINT NOT NULL DEFAULT 0,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    error_message TEXT,
    UNIQUE(season, data_kind)
);
"#;

/// `sqlx`-backed [`Store`] over a shared connection pool. The pool is the only
/// resource shared with request-serving code; the pipeline takes no explicit
/// cross-operation locks.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_conns: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_conns)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent schema bootstrap, including the progress table.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA_SQL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn team_id_by_abbr(&self, abbr: &str) -> Result<Option<Uuid>, StoreError> {
        let id = sqlx::query_scalar("SELECT id FROM teams WHERE abbreviation = $1")
            .bind(abbr)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn upsert_team(&self, row: &TeamRow) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO teams (id, abbreviation, name, city, conference, division, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
               ON CONFLICT (abbreviation) DO UPDATE SET
                   name = EXCLUDED.name,
                   city = EXCLUDED.city,
                   updated_at = EXCLUDED.updated_at
               RETURNING id"#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.abbreviation)
        .bind(&row.name)
        .bind(&row.city)
        .bind(&row.conference)
        .bind(&row.division)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn player_id_by_external(&self, external_id: &str) -> Result<Option<Uuid>, StoreError> {
        let id = sqlx::query_scalar("SELECT id FROM players WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn upsert_player(
        &self,
        row: &RosterRow,
        team_id: Option<Uuid>,
    ) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO players (id, external_id, name, position, team_id, jersey_number, status, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
               ON CONFLICT (external_id) DO UPDATE SET
                   name = EXCLUDED.name,
                   position = EXCLUDED.position,
                   team_id = EXCLUDED.team_id,
                   jersey_number = EXCLUDED.jersey_number,
                   status = EXCLUDED.status,
                   updated_at = EXCLUDED.updated_at
               RETURNING id"#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.player_id)
        .bind(&row.full_name)
        .bind(&row.position)
        .bind(team_id)
        .bind(row.jersey_number)
        .bind(&row.status)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn game_id_by_external(&self, external_id: &str) -> Result<Option<Uuid>, StoreError> {
        let id = sqlx::query_scalar("SELECT id FROM games WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn upsert_game(
        &self,
        row: &ScheduleRow,
        home_team_id: Uuid,
        away_team_id: Uuid,
    ) -> Result<Uuid, StoreError> {
        let game_date = row
            .game_date()
            .ok_or_else(|| StoreError::InvalidRow(format!("game date {:?}", row.game_day)))?;
        let now = Utc::now();
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO games (id, external_id, season, week, game_date, home_team_id, away_team_id,
                                  home_score, away_score, status, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $11, $10, $10)
               ON CONFLICT (external_id) DO UPDATE SET
                   home_score = EXCLUDED.home_score,
                   away_score = EXCLUDED.away_score,
                   status = EXCLUDED.status,
                   updated_at = EXCLUDED.updated_at
               RETURNING id"#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.game_id)
        .bind(row.season)
        .bind(row.week)
        .bind(game_date)
        .bind(home_team_id)
        .bind(away_team_id)
        .bind(row.home_score)
        .bind(row.away_score)
        .bind(now)
        .bind(game_status(row))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn upsert_game_stat(
        &self,
        player_id: Uuid,
        row: &PlayerStatRow,
    ) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO game_stats (id, player_id, season, week, passing_yards, passing_tds,
                                       interceptions, rushing_yards, rushing_tds, receiving_yards,
                                       receiving_tds, receptions, targets, fantasy_points,
                                       created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
               ON CONFLICT (player_id, season, week) DO UPDATE SET
                   passing_yards = EXCLUDED.passing_yards,
                   passing_tds = EXCLUDED.passing_tds,
                   interceptions = EXCLUDED.interceptions,
                   rushing_yards = EXCLUDED.rushing_yards,
                   rushing_tds = EXCLUDED.rushing_tds,
                   receiving_yards = EXCLUDED.receiving_yards,
                   receiving_tds = EXCLUDED.receiving_tds,
                   receptions = EXCLUDED.receptions,
                   targets = EXCLUDED.targets,
                   fantasy_points = EXCLUDED.fantasy_points,
                   updated_at = EXCLUDED.updated_at
               RETURNING id"#,
        )
        .bind(Uuid::new_v4())
        .bind(player_id)
        .bind(row.season)
        .bind(row.week)
        .bind(row.passing_yards)
        .bind(row.passing_tds)
        .bind(row.interceptions)
        .bind(row.rushing_yards)
        .bind(row.rushing_tds)
        .bind(row.receiving_yards)
        .bind(row.receiving_tds)
        .bind(row.receptions)
        .bind(row.targets)
        .bind(row.fantasy_points)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn upsert_advanced_stat(
        &self,
        player_id: Uuid,
        row: &AdvancedStatRow,
    ) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO advanced_stats (id, player_id, season, week, stat_type,
                                           avg_time_to_throw, avg_separation,
                                           avg_yards_after_catch, efficiency,
                                           created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
               ON CONFLICT (player_id, season, week, stat_type) DO UPDATE SET
                   avg_time_to_throw = EXCLUDED.avg_time_to_throw,
                   avg_separation = EXCLUDED.avg_separation,
                   avg_yards_after_catch = EXCLUDED.avg_yards_after_catch,
                   efficiency = EXCLUDED.efficiency,
                   updated_at = EXCLUDED.updated_at
               RETURNING id"#,
        )
        .bind(Uuid::new_v4())
        .bind(player_id)
        .bind(row.season)
        .bind(row.week)
        .bind(row.stat_type.as_str())
        .bind(row.avg_time_to_throw)
        .bind(row.avg_separation)
        .bind(row.avg_yards_after_catch)
        .bind(row.efficiency)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn upsert_injury(&self, player_id: Uuid, row: &InjuryRow) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO injury_reports (id, player_id, season, week, report_status,
                                           practice_status, injury, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
               ON CONFLICT (player_id, season, week) DO UPDATE SET
                   report_status = EXCLUDED.report_status,
                   practice_status = EXCLUDED.practice_status,
                   injury = EXCLUDED.injury,
                   updated_at = EXCLUDED.updated_at
               RETURNING id"#,
        )
        .bind(Uuid::new_v4())
        .bind(player_id)
        .bind(row.season)
        .bind(row.week)
        .bind(&row.report_status)
        .bind(&row.practice_status)
        .bind(&row.injury)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn upsert_progress(&self, progress: &ImportProgress) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO import_progress (season, data_kind, status, records_imported,
                                            started_at, completed_at, error_message)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (season, data_kind) DO UPDATE SET
                   status = EXCLUDED.status,
                   records_imported = EXCLUDED.records_imported,
                   started_at = EXCLUDED.started_at,
                   completed_at = EXCLUDED.completed_at,
                   error_message = EXCLUDED.error_message"#,
        )
        .bind(progress.season)
        .bind(progress.data_kind.as_str())
        .bind(progress.status.as_str())
        .bind(progress.records_imported)
        .bind(progress.started_at)
        .bind(progress.completed_at)
        .bind(&progress.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn progress(
        &self,
        season: i32,
        kind: DataKind,
    ) -> Result<Option<ImportProgress>, StoreError> {
        let row = sqlx::query(
            r#"SELECT status, records_imported, started_at, completed_at, error_message
               FROM import_progress WHERE season = $1 AND data_kind = $2"#,
        )
        .bind(season)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| ImportProgress {
            season,
            data_kind: kind,
            status: ImportStatus::parse(row.get::<String, _>("status").as_str())
                .unwrap_or(ImportStatus::NotStarted),
            records_imported: row.get("records_imported"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            error_message: row.get("error_message"),
        }))
    }

    async fn entity_counts(&self) -> Result<EntityCounts, StoreError> {
        Ok(EntityCounts {
            teams: self.count("teams").await?,
            players: self.count("players").await?,
            games: self.count("games").await?,
            game_stats: self.count("game_stats").await?,
            advanced_stats: self.count("advanced_stats").await?,
            injuries: self.count("injury_reports").await?,
        })
    }

    async fn season_coverage(
        &self,
        start: i32,
        end: i32,
    ) -> Result<Vec<SeasonCoverage>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT season, COUNT(*) AS games FROM games
               WHERE season BETWEEN $1 AND $2 GROUP BY season"#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        let mut by_season: HashMap<i32, i64> = HashMap::new();
        for row in rows {
            by_season.insert(row.get("season"), row.get("games"));
        }
        Ok((start..=end)
            .map(|season| {
                let games = by_season.get(&season).copied().unwrap_or(0);
                SeasonCoverage {
                    season,
                    games,
                    status: CoverageStatus::for_game_count(games),
                }
            })
            .collect())
    }
}
