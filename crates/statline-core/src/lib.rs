//! Core domain model and source-row contracts for statline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "statline-core";

/// First season with advanced (tracking-derived) metrics in the upstream feed.
pub const ADVANCED_STATS_FROM: i32 = 2016;

/// Kinds of data a single import run moves, keyed together with a season in
/// the progress table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Teams,
    Rosters,
    Schedule,
    PlayerStats,
    AdvancedStats,
    Injuries,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Teams => "teams",
            DataKind::Rosters => "rosters",
            DataKind::Schedule => "schedule",
            DataKind::PlayerStats => "player_stats",
            DataKind::AdvancedStats => "advanced_stats",
            DataKind::Injuries => "injuries",
        }
    }

    /// Whether the upstream sources carry this kind for the given season.
    pub fn available_for(&self, season: i32) -> bool {
        match self {
            DataKind::AdvancedStats => season >= ADVANCED_STATS_FROM,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::NotStarted => "not_started",
            ImportStatus::InProgress => "in_progress",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(ImportStatus::NotStarted),
            "in_progress" => Some(ImportStatus::InProgress),
            "completed" => Some(ImportStatus::Completed),
            "failed" => Some(ImportStatus::Failed),
            _ => None,
        }
    }
}

/// One row per (season, data kind); last write wins, no history retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub season: i32,
    pub data_kind: DataKind,
    pub status: ImportStatus,
    pub records_imported: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Source rows: immutable, adapter-produced records. Serde names follow the
// upstream archive column headers so the csv boundary stays declarative.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRow {
    #[serde(rename = "team_abbr")]
    pub abbreviation: String,
    #[serde(rename = "team_name")]
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(rename = "team_conf", default)]
    pub conference: String,
    #[serde(rename = "team_division", default)]
    pub division: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRow {
    #[serde(default)]
    pub season: i32,
    #[serde(rename = "team")]
    pub team_abbr: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub jersey_number: Option<i32>,
    #[serde(default)]
    pub status: String,
    pub full_name: String,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub weight: Option<i32>,
    #[serde(default)]
    pub college: Option<String>,
    /// Natural key: the federation's stable player id.
    #[serde(rename = "gsis_id")]
    pub player_id: String,
    #[serde(default)]
    pub years_exp: Option<i32>,
    #[serde(default)]
    pub headshot_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub season: i32,
    #[serde(default)]
    pub game_type: String,
    pub week: i32,
    /// Natural key: the federation's stable game id.
    pub game_id: String,
    #[serde(rename = "gameday")]
    pub game_day: String,
    pub away_team: String,
    #[serde(default)]
    pub away_score: Option<i32>,
    pub home_team: String,
    #[serde(default)]
    pub home_score: Option<i32>,
    #[serde(default)]
    pub stadium: Option<String>,
    #[serde(default)]
    pub temp: Option<i32>,
}

impl ScheduleRow {
    pub fn is_regular_season(&self) -> bool {
        self.game_type == "REG"
    }

    pub fn game_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.game_day, "%Y-%m-%d").ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatRow {
    pub player_id: String,
    #[serde(rename = "player_display_name", default)]
    pub player_name: String,
    pub season: i32,
    pub week: i32,
    #[serde(default)]
    pub season_type: String,
    #[serde(rename = "recent_team", default)]
    pub team_abbr: String,
    #[serde(default)]
    pub completions: i32,
    #[serde(default)]
    pub attempts: i32,
    #[serde(default)]
    pub passing_yards: f64,
    #[serde(default)]
    pub passing_tds: i32,
    #[serde(default)]
    pub interceptions: i32,
    #[serde(default)]
    pub carries: i32,
    #[serde(default)]
    pub rushing_yards: f64,
    #[serde(default)]
    pub rushing_tds: i32,
    #[serde(default)]
    pub receptions: i32,
    #[serde(default)]
    pub targets: i32,
    #[serde(default)]
    pub receiving_yards: f64,
    #[serde(default)]
    pub receiving_tds: i32,
    #[serde(default)]
    pub fantasy_points: f64,
}

impl PlayerStatRow {
    pub fn is_regular_season(&self) -> bool {
        self.season_type == "REG"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdvancedStatType {
    Passing,
    Rushing,
    Receiving,
}

impl AdvancedStatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvancedStatType::Passing => "passing",
            AdvancedStatType::Rushing => "rushing",
            AdvancedStatType::Receiving => "receiving",
        }
    }

    /// Seasons each tracking feed begins in the upstream archive.
    pub fn first_season(&self) -> i32 {
        match self {
            AdvancedStatType::Passing => 2016,
            AdvancedStatType::Receiving => 2017,
            AdvancedStatType::Rushing => 2018,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedStatRow {
    pub player_id: String,
    pub season: i32,
    pub week: i32,
    pub stat_type: AdvancedStatType,
    #[serde(default)]
    pub avg_time_to_throw: Option<f64>,
    #[serde(default)]
    pub avg_separation: Option<f64>,
    #[serde(default)]
    pub avg_yards_after_catch: Option<f64>,
    #[serde(default)]
    pub efficiency: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryRow {
    #[serde(rename = "gsis_id")]
    pub player_id: String,
    pub season: i32,
    pub week: i32,
    #[serde(default)]
    pub report_status: String,
    #[serde(default)]
    pub practice_status: Option<String>,
    #[serde(default)]
    pub injury: Option<String>,
}

// ---------------------------------------------------------------------------
// Domain entities: surrogate ids are generated once per natural key and never
// change across re-imports.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub abbreviation: String,
    pub name: String,
    pub city: String,
    pub conference: String,
    pub division: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub position: String,
    pub team_id: Option<Uuid>,
    pub jersey_number: Option<i32>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub external_id: String,
    pub season: i32,
    pub week: i32,
    pub game_date: NaiveDate,
    pub home_team_id: Uuid,
    pub away_team_id: Uuid,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStat {
    pub id: Uuid,
    pub player_id: Uuid,
    pub season: i32,
    pub week: i32,
    pub passing_yards: f64,
    pub passing_tds: i32,
    pub interceptions: i32,
    pub rushing_yards: f64,
    pub rushing_tds: i32,
    pub receiving_yards: f64,
    pub receiving_tds: i32,
    pub receptions: i32,
    pub targets: i32,
    pub fantasy_points: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedStat {
    pub id: Uuid,
    pub player_id: Uuid,
    pub season: i32,
    pub week: i32,
    pub stat_type: AdvancedStatType,
    pub avg_time_to_throw: Option<f64>,
    pub avg_separation: Option<f64>,
    pub avg_yards_after_catch: Option<f64>,
    pub efficiency: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryReport {
    pub id: Uuid,
    pub player_id: Uuid,
    pub season: i32,
    pub week: i32,
    pub report_status: String,
    pub practice_status: Option<String>,
    pub injury: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
