//! Orchestration: row sources, the historical season importer, and the
//! in-season sync service with its live polling loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use statline_cache::{CacheInvalidator, InvalidationEvent};
use statline_client::{ApiTransport, ReqwestSender, ScoreboardClient, SendRequest};
use statline_core::{
    AdvancedStatRow, AdvancedStatType, DataKind, InjuryRow, PlayerStatRow, RosterRow, ScheduleRow,
    TeamRow,
};
use statline_store::{BatchOutcome, ProgressTracker, Store, UpsertEngine};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "statline-sync";

/// Default cadence of the live polling loop.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Entries untouched for this long get dropped by the advisory sweep.
pub const CACHE_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const REGULAR_SEASON_WEEKS: i32 = 18;

/// Season-scoped row production, separated from orchestration so tests feed
/// rows without a network. The archive and the live scoreboard API both sit
/// behind this.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn teams(&self) -> anyhow::Result<Vec<TeamRow>>;
    async fn rosters(&self, season: i32) -> anyhow::Result<Vec<RosterRow>>;
    async fn schedule(&self, season: i32) -> anyhow::Result<Vec<ScheduleRow>>;

    /// Games of a single week. The default filters the full schedule; sources
    /// with a per-week endpoint override this with a single fetch.
    async fn week_games(&self, season: i32, week: i32) -> anyhow::Result<Vec<ScheduleRow>> {
        Ok(self
            .schedule(season)
            .await?
            .into_iter()
            .filter(|row| row.week == week)
            .collect())
    }

    async fn player_stats(&self, season: i32) -> anyhow::Result<Vec<PlayerStatRow>>;
    async fn advanced_stats(
        &self,
        season: i32,
        stat_type: AdvancedStatType,
    ) -> anyhow::Result<Vec<AdvancedStatRow>>;
    async fn injuries(&self, season: i32) -> anyhow::Result<Vec<InjuryRow>>;
}

// ---------------------------------------------------------------------------
// Archive source (CSV over HTTP)
// ---------------------------------------------------------------------------

/// Advanced-stat files carry no type column; the type is encoded in the file
/// name and injected when rows are mapped.
#[derive(Debug, Deserialize)]
struct ArchiveAdvancedRow {
    #[serde(rename = "player_gsis_id")]
    player_id: String,
    season: i32,
    week: i32,
    #[serde(default)]
    avg_time_to_throw: Option<f64>,
    #[serde(default)]
    avg_separation: Option<f64>,
    #[serde(default)]
    avg_yards_after_catch: Option<f64>,
    #[serde(default)]
    efficiency: Option<f64>,
}

/// Pulls season CSV files from the stats archive through the retrying
/// transport and deserializes them straight into source rows.
#[derive(Debug)]
pub struct ArchiveSource<S = ReqwestSender> {
    transport: ApiTransport<S>,
    base_url: String,
}

impl ArchiveSource<ReqwestSender> {
    pub fn new(base_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        Ok(Self {
            // Season files run to tens of megabytes; allow a slow pull.
            transport: ApiTransport::new(user_agent, Duration::from_secs(120))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl<S: SendRequest> ArchiveSource<S> {
    pub fn with_transport(transport: ApiTransport<S>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_csv<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<Vec<T>> {
        let url = format!("{}/{path}", self.base_url);
        let body = self
            .transport
            .fetch(&url)
            .await
            .with_context(|| format!("fetching {url}"))?;
        Ok(parse_csv(&body, path))
    }
}

/// Deserialize every record, skipping rows the archive ships malformed. A bad
/// row costs one warning, never the file.
fn parse_csv<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Vec<T> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        match record {
            Ok(row) => rows.push(row),
            Err(err) => warn!(what, error = %err, "skipping malformed csv row"),
        }
    }
    rows
}

#[async_trait]
impl<S: SendRequest> RowSource for ArchiveSource<S> {
    async fn teams(&self) -> anyhow::Result<Vec<TeamRow>> {
        self.fetch_csv("teams.csv").await
    }

    async fn rosters(&self, season: i32) -> anyhow::Result<Vec<RosterRow>> {
        self.fetch_csv(&format!("rosters/roster_{season}.csv")).await
    }

    async fn schedule(&self, season: i32) -> anyhow::Result<Vec<ScheduleRow>> {
        self.fetch_csv(&format!("schedules/sched_{season}.csv")).await
    }

    async fn player_stats(&self, season: i32) -> anyhow::Result<Vec<PlayerStatRow>> {
        self.fetch_csv(&format!("player_stats/player_stats_{season}.csv"))
            .await
    }

    async fn advanced_stats(
        &self,
        season: i32,
        stat_type: AdvancedStatType,
    ) -> anyhow::Result<Vec<AdvancedStatRow>> {
        let path = format!("nextgen_stats/ngs_{season}_{}.csv", stat_type.as_str());
        let rows: Vec<ArchiveAdvancedRow> = self.fetch_csv(&path).await?;
        Ok(rows
            .into_iter()
            // Week 0 rows are season aggregates, not weekly stats.
            .filter(|row| row.week >= 1)
            .map(|row| AdvancedStatRow {
                player_id: row.player_id,
                season: row.season,
                week: row.week,
                stat_type,
                avg_time_to_throw: row.avg_time_to_throw,
                avg_separation: row.avg_separation,
                avg_yards_after_catch: row.avg_yards_after_catch,
                efficiency: row.efficiency,
            })
            .collect())
    }

    async fn injuries(&self, season: i32) -> anyhow::Result<Vec<InjuryRow>> {
        self.fetch_csv(&format!("injuries/injuries_{season}.csv"))
            .await
    }
}

// ---------------------------------------------------------------------------
// Live source (scoreboard API)
// ---------------------------------------------------------------------------

/// Adapts the scoreboard API client to the row contract. Stats, advanced
/// metrics, and injury reports only exist in the archive; asking this source
/// for them is a wiring mistake and fails loudly.
#[derive(Debug)]
pub struct LiveSource<S = ReqwestSender> {
    client: ScoreboardClient<S>,
}

impl LiveSource<ReqwestSender> {
    pub fn new(base_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: ScoreboardClient::new(base_url, user_agent)?,
        })
    }
}

impl<S: SendRequest> LiveSource<S> {
    pub fn with_client(client: ScoreboardClient<S>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<S: SendRequest> RowSource for LiveSource<S> {
    async fn teams(&self) -> anyhow::Result<Vec<TeamRow>> {
        let payload = self.client.fetch_teams().await?;
        Ok(payload.teams.iter().map(|team| team.team_row()).collect())
    }

    async fn rosters(&self, season: i32) -> anyhow::Result<Vec<RosterRow>> {
        let payload = self.client.fetch_teams().await?;
        let mut rows = Vec::new();
        for team in &payload.teams {
            let roster = self
                .client
                .fetch_team_roster(&team.id)
                .await
                .with_context(|| format!("roster for team {}", team.abbreviation))?;
            rows.extend(roster.roster_rows(season));
        }
        Ok(rows)
    }

    async fn schedule(&self, season: i32) -> anyhow::Result<Vec<ScheduleRow>> {
        let mut rows = Vec::new();
        for week in 1..=REGULAR_SEASON_WEEKS {
            let scoreboard = self
                .client
                .fetch_scoreboard(season, week)
                .await
                .with_context(|| format!("scoreboard week {week}"))?;
            rows.extend(scoreboard.schedule_rows());
        }
        Ok(rows)
    }

    async fn week_games(&self, season: i32, week: i32) -> anyhow::Result<Vec<ScheduleRow>> {
        let scoreboard = self.client.fetch_scoreboard(season, week).await?;
        Ok(scoreboard.schedule_rows())
    }

    async fn player_stats(&self, _season: i32) -> anyhow::Result<Vec<PlayerStatRow>> {
        anyhow::bail!("the scoreboard api does not serve player stats")
    }

    async fn advanced_stats(
        &self,
        _season: i32,
        _stat_type: AdvancedStatType,
    ) -> anyhow::Result<Vec<AdvancedStatRow>> {
        anyhow::bail!("the scoreboard api does not serve advanced stats")
    }

    async fn injuries(&self, _season: i32) -> anyhow::Result<Vec<InjuryRow>> {
        anyhow::bail!("the scoreboard api does not serve injury reports")
    }
}

// ---------------------------------------------------------------------------
// Historical importer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SeasonReport {
    pub season: i32,
    pub rosters: usize,
    pub games: usize,
    pub stats: usize,
    pub advanced: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl SeasonReport {
    pub fn summary(&self) -> String {
        format!(
            "season {}: {} rosters, {} games, {} stat lines, {} advanced, {} skipped, {} errors",
            self.season,
            self.rosters,
            self.games,
            self.stats,
            self.advanced,
            self.skipped,
            self.errors.len()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct RangeReport {
    pub start: i32,
    pub end: i32,
    pub seasons: Vec<SeasonReport>,
    pub errors: Vec<String>,
}

impl RangeReport {
    pub fn total_applied(&self) -> usize {
        self.seasons
            .iter()
            .map(|s| s.rosters + s.games + s.stats + s.advanced)
            .sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "seasons {}-{}: {} records applied, {} errors",
            self.start,
            self.end,
            self.total_applied(),
            self.errors.len()
        )
    }
}

/// Drives archive imports season by season: rosters, schedule, player stats,
/// then advanced stats where the season has them. A stage failure is recorded
/// and the remaining stages still run; a season failure never aborts a range.
pub struct Importer {
    source: Arc<dyn RowSource>,
    engine: UpsertEngine,
    tracker: ProgressTracker,
    invalidator: Option<CacheInvalidator>,
    dry_run: bool,
}

impl Importer {
    pub fn new(source: Arc<dyn RowSource>, store: Arc<dyn Store>) -> Self {
        Self {
            source,
            engine: UpsertEngine::new(store.clone()),
            tracker: ProgressTracker::new(store),
            invalidator: None,
            dry_run: false,
        }
    }

    pub fn with_invalidator(mut self, invalidator: CacheInvalidator) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Dry runs fetch and count but leave the store, the progress table, and
    /// the cache untouched.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.engine = self.engine.clone().dry_run(dry_run);
        self.dry_run = dry_run;
        self
    }

    /// Teams change rarely and are not season-scoped; callers run this once
    /// before a season or range import.
    pub async fn import_teams(&self) -> anyhow::Result<BatchOutcome> {
        let rows = self.source.teams().await.context("fetching teams")?;
        let outcome = self.engine.upsert_teams(&rows).await;
        info!(
            applied = outcome.applied,
            skipped = outcome.skipped.len(),
            "teams upserted"
        );
        self.invalidate(DataKind::Teams).await;
        Ok(outcome)
    }

    pub async fn import_season(&self, season: i32) -> SeasonReport {
        let mut report = SeasonReport {
            season,
            ..Default::default()
        };
        info!(season, dry_run = self.dry_run, "importing season");

        self.mark_started(season, DataKind::Rosters).await;
        match self.source.rosters(season).await {
            Ok(rows) => {
                let outcome = self.engine.upsert_rosters(&rows).await;
                report.rosters = outcome.applied;
                report.skipped += outcome.skipped.len();
                self.mark_completed(season, DataKind::Rosters, outcome.applied)
                    .await;
                self.invalidate(DataKind::Rosters).await;
            }
            Err(err) => {
                self.stage_failed(&mut report, DataKind::Rosters, &err)
                    .await;
            }
        }

        self.mark_started(season, DataKind::Schedule).await;
        match self.source.schedule(season).await {
            Ok(rows) => {
                let regular: Vec<ScheduleRow> = rows
                    .into_iter()
                    .filter(ScheduleRow::is_regular_season)
                    .collect();
                let outcome = self.engine.upsert_schedule(&regular).await;
                report.games = outcome.applied;
                report.skipped += outcome.skipped.len();
                self.mark_completed(season, DataKind::Schedule, outcome.applied)
                    .await;
                self.invalidate(DataKind::Schedule).await;
            }
            Err(err) => {
                self.stage_failed(&mut report, DataKind::Schedule, &err)
                    .await;
            }
        }

        self.mark_started(season, DataKind::PlayerStats).await;
        match self.source.player_stats(season).await {
            Ok(rows) => {
                let regular: Vec<PlayerStatRow> = rows
                    .into_iter()
                    .filter(PlayerStatRow::is_regular_season)
                    .collect();
                let outcome = self.engine.upsert_player_stats(&regular).await;
                report.stats = outcome.applied;
                report.skipped += outcome.skipped.len();
                self.mark_completed(season, DataKind::PlayerStats, outcome.applied)
                    .await;
                self.invalidate(DataKind::PlayerStats).await;
            }
            Err(err) => {
                self.stage_failed(&mut report, DataKind::PlayerStats, &err)
                    .await;
            }
        }

        if DataKind::AdvancedStats.available_for(season) {
            self.import_advanced(season, &mut report).await;
        } else {
            debug!(season, "advanced stats not available, stage skipped");
        }

        info!(season, summary = %report.summary(), "season import finished");
        report
    }

    /// One progress entry covers all three tracking feeds; a feed that fails
    /// to download fails the stage but the other feeds still load.
    async fn import_advanced(&self, season: i32, report: &mut SeasonReport) {
        self.mark_started(season, DataKind::AdvancedStats).await;
        let mut outcome = BatchOutcome::default();
        let mut stage_errors = Vec::new();
        for stat_type in [
            AdvancedStatType::Passing,
            AdvancedStatType::Receiving,
            AdvancedStatType::Rushing,
        ] {
            if season < stat_type.first_season() {
                continue;
            }
            match self.source.advanced_stats(season, stat_type).await {
                Ok(rows) => outcome.merge(self.engine.upsert_advanced_stats(&rows).await),
                Err(err) => stage_errors.push(format!("{}: {err:#}", stat_type.as_str())),
            }
        }
        report.advanced = outcome.applied;
        report.skipped += outcome.skipped.len();
        if stage_errors.is_empty() {
            self.mark_completed(season, DataKind::AdvancedStats, outcome.applied)
                .await;
            self.invalidate(DataKind::AdvancedStats).await;
        } else {
            let message = stage_errors.join("; ");
            report
                .errors
                .push(format!("season {season}: advanced_stats: {message}"));
            self.mark_failed(season, DataKind::AdvancedStats, &message)
                .await;
        }
    }

    /// Inclusive on both ends. Every season gets its attempt; errors carry
    /// their season so a long backfill stays diagnosable.
    pub async fn import_range(&self, start: i32, end: i32) -> RangeReport {
        let mut report = RangeReport {
            start,
            end,
            ..Default::default()
        };
        for season in start..=end {
            let season_report = self.import_season(season).await;
            report.errors.extend(season_report.errors.iter().cloned());
            report.seasons.push(season_report);
        }
        info!(summary = %report.summary(), "range import finished");
        report
    }

    async fn stage_failed(&self, report: &mut SeasonReport, kind: DataKind, err: &anyhow::Error) {
        let message = format!("{err:#}");
        warn!(
            season = report.season,
            kind = kind.as_str(),
            error = %message,
            "stage failed"
        );
        report
            .errors
            .push(format!("season {}: {}: {message}", report.season, kind.as_str()));
        self.mark_failed(report.season, kind, &message).await;
    }

    // Progress bookkeeping is best-effort: a store hiccup while recording
    // state must not take down the stage that just succeeded.

    async fn mark_started(&self, season: i32, kind: DataKind) {
        if self.dry_run {
            return;
        }
        if let Err(err) = self.tracker.mark_started(season, kind).await {
            warn!(season, kind = kind.as_str(), error = %err, "failed to record stage start");
        }
    }

    async fn mark_completed(&self, season: i32, kind: DataKind, records: usize) {
        if self.dry_run {
            return;
        }
        if let Err(err) = self
            .tracker
            .mark_completed(season, kind, records as i64)
            .await
        {
            warn!(season, kind = kind.as_str(), error = %err, "failed to record stage completion");
        }
    }

    async fn mark_failed(&self, season: i32, kind: DataKind, message: &str) {
        if self.dry_run {
            return;
        }
        if let Err(err) = self.tracker.mark_failed(season, kind, message).await {
            warn!(season, kind = kind.as_str(), error = %err, "failed to record stage failure");
        }
    }

    async fn invalidate(&self, kind: DataKind) {
        if self.dry_run {
            return;
        }
        let Some(invalidator) = &self.invalidator else {
            return;
        };
        match invalidator.invalidate(InvalidationEvent::AfterSync(kind)).await {
            Ok(removed) => debug!(kind = kind.as_str(), removed, "cache invalidated after stage"),
            Err(err) => warn!(kind = kind.as_str(), error = %err, "cache invalidation failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// In-season sync service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub teams: usize,
    pub rosters: usize,
    pub games: usize,
    pub stats: usize,
    pub injuries: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "{} teams, {} rosters, {} games, {} stat lines, {} injuries, {} errors",
            self.teams,
            self.rosters,
            self.games,
            self.stats,
            self.injuries,
            self.errors.len()
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LiveOptions {
    pub week: i32,
    pub interval: Duration,
}

impl LiveOptions {
    pub fn new(week: i32) -> Self {
        Self {
            week,
            interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Keeps the current season fresh. Entities and schedules come from the live
/// scoreboard API, stat lines and injury reports from the archive. Stage
/// failures are collected, never fatal to the run.
pub struct SeasonSync {
    live: Arc<dyn RowSource>,
    archive: Arc<dyn RowSource>,
    engine: UpsertEngine,
    invalidator: Option<CacheInvalidator>,
    season: i32,
}

impl SeasonSync {
    pub fn new(
        live: Arc<dyn RowSource>,
        archive: Arc<dyn RowSource>,
        store: Arc<dyn Store>,
        season: i32,
    ) -> Self {
        Self {
            live,
            archive,
            engine: UpsertEngine::new(store),
            invalidator: None,
            season,
        }
    }

    pub fn with_invalidator(mut self, invalidator: CacheInvalidator) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Everything: teams, rosters, the full schedule, then stats and injuries.
    pub async fn full(&self) -> SyncReport {
        let mut report = SyncReport::default();
        info!(season = self.season, "full season sync");

        match self.live.teams().await {
            Ok(rows) => {
                report.teams = self.engine.upsert_teams(&rows).await.applied;
                self.invalidate(InvalidationEvent::AfterSync(DataKind::Teams))
                    .await;
            }
            Err(err) => report.errors.push(format!("teams: {err:#}")),
        }

        self.sync_rosters(&mut report).await;

        match self.live.schedule(self.season).await {
            Ok(rows) => {
                report.games = self.engine.upsert_schedule(&rows).await.applied;
                self.invalidate(InvalidationEvent::AfterSync(DataKind::Schedule))
                    .await;
            }
            Err(err) => report.errors.push(format!("schedule: {err:#}")),
        }

        self.sync_stats(&mut report).await;
        self.sync_injuries(&mut report).await;

        info!(summary = %report.summary(), "full sync finished");
        report
    }

    /// Weekly refresh: roster moves, this week's games, stats, injuries.
    pub async fn update(&self, week: i32) -> SyncReport {
        let mut report = SyncReport::default();
        info!(season = self.season, week, "weekly sync");

        self.sync_rosters(&mut report).await;

        match self.live.week_games(self.season, week).await {
            Ok(rows) => {
                report.games = self.engine.upsert_schedule(&rows).await.applied;
                self.invalidate(InvalidationEvent::SeasonWeek {
                    season: self.season,
                    week,
                })
                .await;
            }
            Err(err) => report.errors.push(format!("week {week} games: {err:#}")),
        }

        self.sync_stats(&mut report).await;
        self.sync_injuries(&mut report).await;

        info!(summary = %report.summary(), "weekly sync finished");
        report
    }

    pub async fn stats_only(&self) -> SyncReport {
        let mut report = SyncReport::default();
        self.sync_stats(&mut report).await;
        report
    }

    pub async fn injuries_only(&self) -> SyncReport {
        let mut report = SyncReport::default();
        self.sync_injuries(&mut report).await;
        report
    }

    async fn sync_rosters(&self, report: &mut SyncReport) {
        match self.live.rosters(self.season).await {
            Ok(rows) => {
                let outcome = self.engine.upsert_rosters(&rows).await;
                report.rosters = outcome.applied;
                self.invalidate(InvalidationEvent::AfterSync(DataKind::Rosters))
                    .await;
            }
            Err(err) => report.errors.push(format!("rosters: {err:#}")),
        }
    }

    async fn sync_stats(&self, report: &mut SyncReport) {
        match self.archive.player_stats(self.season).await {
            Ok(rows) => {
                let regular: Vec<PlayerStatRow> = rows
                    .into_iter()
                    .filter(PlayerStatRow::is_regular_season)
                    .collect();
                report.stats = self.engine.upsert_player_stats(&regular).await.applied;
                self.invalidate(InvalidationEvent::AfterSync(DataKind::PlayerStats))
                    .await;
            }
            Err(err) => report.errors.push(format!("player stats: {err:#}")),
        }
    }

    async fn sync_injuries(&self, report: &mut SyncReport) {
        match self.archive.injuries(self.season).await {
            Ok(rows) => {
                report.injuries = self.engine.upsert_injuries(&rows).await.applied;
                self.invalidate(InvalidationEvent::AfterSync(DataKind::Injuries))
                    .await;
            }
            Err(err) => report.errors.push(format!("injuries: {err:#}")),
        }
    }

    /// Poll the current week until cancelled. The first iteration runs
    /// immediately; afterwards the interval paces the loop. Ticks that land
    /// while an iteration is still running collapse into a single pending
    /// tick, so a slow iteration is followed by one catch-up run, not a burst.
    /// An in-flight iteration is never interrupted by cancellation.
    ///
    /// Returns the number of iterations that ran.
    pub async fn live(&self, opts: LiveOptions, mut cancel: watch::Receiver<bool>) -> u64 {
        info!(
            season = self.season,
            week = opts.week,
            interval_secs = opts.interval.as_secs(),
            "live sync started"
        );
        let mut iterations = 0u64;
        let mut ticker = tokio::time::interval(opts.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick resolves immediately.
        ticker.tick().await;

        loop {
            if *cancel.borrow() {
                break;
            }
            iterations += 1;
            if let Err(err) = self.live_iteration(opts.week).await {
                warn!(iteration = iterations, error = %err, "live sync iteration failed");
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }

        info!(iterations, "live sync stopped");
        iterations
    }

    async fn live_iteration(&self, week: i32) -> anyhow::Result<()> {
        let rows = self.live.week_games(self.season, week).await?;
        let outcome = self.engine.upsert_schedule(&rows).await;
        debug!(
            week,
            games = outcome.applied,
            skipped = outcome.skipped.len(),
            "live games refreshed"
        );
        self.invalidate(InvalidationEvent::SeasonWeek {
            season: self.season,
            week,
        })
        .await;
        if let Some(invalidator) = &self.invalidator {
            if let Err(err) = invalidator.sweep(CACHE_RETENTION).await {
                warn!(error = %err, "cache sweep failed");
            }
        }
        Ok(())
    }

    async fn invalidate(&self, event: InvalidationEvent) {
        let Some(invalidator) = &self.invalidator else {
            return;
        };
        if let Err(err) = invalidator.invalidate(event).await {
            warn!(error = %err, "cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statline_cache::{keys, MemoryCache};
    use statline_core::ImportStatus;
    use statline_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KC_QB: &str = "00-0033873";
    const DET_QB: &str = "00-0033106";

    #[derive(Default)]
    struct TestSource {
        fail_schedule_for: Option<i32>,
        week_delay: Duration,
        week_calls: AtomicUsize,
    }

    impl TestSource {
        fn week_calls(&self) -> usize {
            self.week_calls.load(Ordering::SeqCst)
        }
    }

    fn team(abbr: &str, name: &str) -> TeamRow {
        TeamRow {
            abbreviation: abbr.into(),
            name: name.into(),
            city: String::new(),
            conference: String::new(),
            division: String::new(),
        }
    }

    fn roster_row(season: i32, abbr: &str, player_id: &str, name: &str) -> RosterRow {
        RosterRow {
            season,
            team_abbr: abbr.into(),
            position: "QB".into(),
            jersey_number: Some(15),
            status: "ACT".into(),
            full_name: name.into(),
            birth_date: None,
            height: None,
            weight: None,
            college: None,
            player_id: player_id.into(),
            years_exp: None,
            headshot_url: None,
        }
    }

    fn game_row(season: i32, week: i32) -> ScheduleRow {
        ScheduleRow {
            season,
            game_type: "REG".into(),
            week,
            game_id: format!("{season}_{week:02}_DET_KC"),
            game_day: format!("{season}-09-{:02}", 9 + week),
            away_team: "DET".into(),
            away_score: Some(20),
            home_team: "KC".into(),
            home_score: Some(27),
            stadium: None,
            temp: None,
        }
    }

    fn stat_row(season: i32, player_id: &str) -> PlayerStatRow {
        PlayerStatRow {
            player_id: player_id.into(),
            player_name: String::new(),
            season,
            week: 1,
            season_type: "REG".into(),
            team_abbr: "KC".into(),
            completions: 25,
            attempts: 34,
            passing_yards: 305.0,
            passing_tds: 2,
            interceptions: 0,
            carries: 3,
            rushing_yards: 12.0,
            rushing_tds: 0,
            receptions: 0,
            targets: 0,
            receiving_yards: 0.0,
            receiving_tds: 0,
            fantasy_points: 24.5,
        }
    }

    #[async_trait]
    impl RowSource for TestSource {
        async fn teams(&self) -> anyhow::Result<Vec<TeamRow>> {
            Ok(vec![
                team("KC", "Kansas City Chiefs"),
                team("DET", "Detroit Lions"),
            ])
        }

        async fn rosters(&self, season: i32) -> anyhow::Result<Vec<RosterRow>> {
            Ok(vec![
                roster_row(season, "KC", KC_QB, "Patrick Mahomes"),
                roster_row(season, "DET", DET_QB, "Jared Goff"),
            ])
        }

        async fn schedule(&self, season: i32) -> anyhow::Result<Vec<ScheduleRow>> {
            if self.fail_schedule_for == Some(season) {
                anyhow::bail!("archive returned status 503");
            }
            Ok(vec![game_row(season, 1), game_row(season, 2)])
        }

        async fn week_games(&self, season: i32, week: i32) -> anyhow::Result<Vec<ScheduleRow>> {
            self.week_calls.fetch_add(1, Ordering::SeqCst);
            if !self.week_delay.is_zero() {
                tokio::time::sleep(self.week_delay).await;
            }
            Ok(self
                .schedule(season)
                .await?
                .into_iter()
                .filter(|row| row.week == week)
                .collect())
        }

        async fn player_stats(&self, season: i32) -> anyhow::Result<Vec<PlayerStatRow>> {
            Ok(vec![stat_row(season, KC_QB), stat_row(season, DET_QB)])
        }

        async fn advanced_stats(
            &self,
            season: i32,
            stat_type: AdvancedStatType,
        ) -> anyhow::Result<Vec<AdvancedStatRow>> {
            if stat_type != AdvancedStatType::Passing {
                return Ok(Vec::new());
            }
            Ok(vec![AdvancedStatRow {
                player_id: KC_QB.into(),
                season,
                week: 1,
                stat_type,
                avg_time_to_throw: Some(2.61),
                avg_separation: None,
                avg_yards_after_catch: None,
                efficiency: None,
            }])
        }

        async fn injuries(&self, season: i32) -> anyhow::Result<Vec<InjuryRow>> {
            Ok(vec![InjuryRow {
                player_id: DET_QB.into(),
                season,
                week: 1,
                report_status: "Questionable".into(),
                practice_status: Some("Limited".into()),
                injury: Some("Ankle".into()),
            }])
        }
    }

    async fn seed_teams(store: &MemoryStore) {
        use statline_store::Store as _;
        store
            .upsert_team(&team("KC", "Kansas City Chiefs"))
            .await
            .unwrap();
        store
            .upsert_team(&team("DET", "Detroit Lions"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn season_import_runs_every_stage() {
        let store = Arc::new(MemoryStore::new());
        seed_teams(&store).await;
        let source = Arc::new(TestSource::default());
        let importer = Importer::new(source, store.clone());

        let report = importer.import_season(2023).await;

        assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
        assert_eq!(report.rosters, 2);
        assert_eq!(report.games, 2);
        assert_eq!(report.stats, 2);
        assert_eq!(report.advanced, 1);

        use statline_store::Store as _;
        let progress = store
            .progress(2023, DataKind::Rosters)
            .await
            .unwrap()
            .expect("progress recorded");
        assert_eq!(progress.status, ImportStatus::Completed);
        assert_eq!(progress.records_imported, 2);
        assert_eq!(store.progress_rows(), 4);
    }

    #[tokio::test]
    async fn advanced_stage_skipped_before_first_tracking_season() {
        let store = Arc::new(MemoryStore::new());
        seed_teams(&store).await;
        let source = Arc::new(TestSource::default());
        let importer = Importer::new(source, store.clone());

        let report = importer.import_season(2015).await;

        assert!(report.errors.is_empty());
        assert_eq!(report.advanced, 0);
        // Three stages tracked, no advanced entry at all.
        assert_eq!(store.progress_rows(), 3);
    }

    #[tokio::test]
    async fn dry_run_fetches_and_counts_but_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(TestSource::default());
        let importer = Importer::new(source, store.clone()).dry_run(true);

        let report = importer.import_season(2023).await;

        assert!(report.errors.is_empty());
        assert!(report.rosters > 0);
        assert!(report.games > 0);

        use statline_store::Store as _;
        let counts = store.entity_counts().await.unwrap();
        assert_eq!(counts.total(), 0);
        assert_eq!(store.progress_rows(), 0);
    }

    #[tokio::test]
    async fn range_isolates_a_failing_season() {
        let store = Arc::new(MemoryStore::new());
        seed_teams(&store).await;
        let source = Arc::new(TestSource {
            fail_schedule_for: Some(2022),
            ..Default::default()
        });
        let importer = Importer::new(source, store.clone());

        let report = importer.import_range(2021, 2023).await;

        assert_eq!(report.seasons.len(), 3);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("season 2022"));
        assert!(report.errors[0].contains("schedule"));

        // Neighbours imported cleanly; the failing season still got its
        // other stages.
        assert_eq!(report.seasons[0].games, 2);
        assert_eq!(report.seasons[2].games, 2);
        assert_eq!(report.seasons[1].games, 0);
        assert_eq!(report.seasons[1].rosters, 2);
        assert_eq!(report.seasons[1].stats, 2);

        use statline_store::Store as _;
        let progress = store
            .progress(2022, DataKind::Schedule)
            .await
            .unwrap()
            .expect("failure recorded");
        assert_eq!(progress.status, ImportStatus::Failed);
        assert!(progress.error_message.is_some());
    }

    #[tokio::test]
    async fn reimport_converges_to_the_same_counts() {
        let store = Arc::new(MemoryStore::new());
        seed_teams(&store).await;
        let source = Arc::new(TestSource::default());
        let importer = Importer::new(source, store.clone());

        importer.import_season(2023).await;
        use statline_store::Store as _;
        let first = store.entity_counts().await.unwrap();

        importer.import_season(2023).await;
        let second = store.entity_counts().await.unwrap();

        assert_eq!(first.total(), second.total());
    }

    #[tokio::test]
    async fn import_invalidates_affected_cache_families() {
        let store = Arc::new(MemoryStore::new());
        seed_teams(&store).await;
        let cache = Arc::new(MemoryCache::new());
        cache.set(&keys::players_list("QB", "", 20, 0), "[]");
        cache.set(&keys::games_list(2023, 1, 20, 0), "[]");
        cache.set(&keys::stats_list(2023, 1), "[]");
        cache.set("misc:healthcheck", "ok");

        let source = Arc::new(TestSource::default());
        let importer = Importer::new(source, store)
            .with_invalidator(CacheInvalidator::new(cache.clone()));

        importer.import_season(2023).await;

        assert!(cache.get(&keys::players_list("QB", "", 20, 0)).is_none());
        assert!(cache.get(&keys::games_list(2023, 1, 20, 0)).is_none());
        assert!(cache.get(&keys::stats_list(2023, 1)).is_none());
        assert!(cache.get("misc:healthcheck").is_some());
    }

    #[tokio::test]
    async fn full_sync_moves_every_kind() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(TestSource::default());
        let sync = SeasonSync::new(source.clone(), source, store.clone(), 2025);

        let report = sync.full().await;

        assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
        assert_eq!(report.teams, 2);
        assert_eq!(report.rosters, 2);
        assert_eq!(report.games, 2);
        assert_eq!(report.stats, 2);
        assert_eq!(report.injuries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_loop_collapses_missed_ticks() {
        let store = Arc::new(MemoryStore::new());
        seed_teams(&store).await;
        // Each iteration takes 12 minutes against a 5 minute interval: two
        // ticks land mid-iteration but only one catch-up run follows.
        let source = Arc::new(TestSource {
            week_delay: Duration::from_secs(12 * 60),
            ..Default::default()
        });
        let sync = SeasonSync::new(source.clone(), source.clone(), store, 2025);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            sync.live(
                LiveOptions {
                    week: 1,
                    interval: Duration::from_secs(300),
                },
                cancel_rx,
            )
            .await
        });

        tokio::time::sleep(Duration::from_secs(13 * 60)).await;
        cancel_tx.send(true).unwrap();

        let iterations = handle.await.unwrap();
        assert_eq!(iterations, 2);
        assert_eq!(source.week_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn live_loop_stops_after_cancellation() {
        let store = Arc::new(MemoryStore::new());
        seed_teams(&store).await;
        let source = Arc::new(TestSource::default());
        let sync = SeasonSync::new(source.clone(), source.clone(), store, 2025);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            sync.live(
                LiveOptions {
                    week: 1,
                    interval: Duration::from_secs(300),
                },
                cancel_rx,
            )
            .await
        });

        // Let the immediate first iteration run, then cancel mid-wait.
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel_tx.send(true).unwrap();

        let iterations = handle.await.unwrap();
        assert_eq!(iterations, 1);
        assert_eq!(source.week_calls(), 1);
    }
}
