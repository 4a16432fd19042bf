//! Retry-aware HTTP transport and the live scoreboard API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use statline_core::{RosterRow, ScheduleRow, TeamRow};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "statline-client";

pub const DEFAULT_USER_AGENT: &str = "statline/0.1";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed after {attempts} attempts: {message}")]
    Exhausted { attempts: usize, message: String },
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: usize },
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Bounded, linear retry schedule. The delays match the upstream API's
/// tolerance: plain failures back off one second per attempt already made,
/// rate limits back off harder.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub rate_limit_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            rate_limit_base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Instant retries, for tests that only care about attempt accounting.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            rate_limit_base: Duration::ZERO,
        }
    }

    pub fn retry_delay(&self, attempt: usize) -> Duration {
        self.base_delay.saturating_mul(attempt as u32 + 1)
    }

    pub fn rate_limit_delay(&self, attempt: usize) -> Duration {
        self.rate_limit_base.saturating_mul(attempt as u32 + 2)
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Single-shot request execution, separated from the retry loop so tests can
/// script responses without a network.
#[async_trait]
pub trait SendRequest: Send + Sync {
    async fn send(&self, url: &str) -> Result<RawResponse, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SendRequest for ReqwestSender {
    async fn send(&self, url: &str) -> Result<RawResponse, ApiError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?
            .to_vec();
        Ok(RawResponse { status, body })
    }
}

/// Wraps outbound calls with the bounded retry/backoff schedule. Holds no
/// shared mutable state; safe to call concurrently.
#[derive(Debug)]
pub struct ApiTransport<S = ReqwestSender> {
    sender: S,
    policy: RetryPolicy,
}

impl ApiTransport<ReqwestSender> {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            sender: ReqwestSender::new(user_agent, timeout)?,
            policy: RetryPolicy::default(),
        })
    }
}

impl<S: SendRequest> ApiTransport<S> {
    pub fn with_sender(sender: S, policy: RetryPolicy) -> Self {
        Self { sender, policy }
    }

    /// Fetch the endpoint body, retrying network failures, 5xx, and 429
    /// responses within the attempt budget. Any other non-2xx fails at once.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let attempts = self.policy.max_attempts;
        let mut rate_limited = false;
        let mut last_message = String::new();

        for attempt in 0..attempts {
            match self.sender.send(url).await {
                Ok(response) if response.is_success() => {
                    debug!(url, attempt, "fetch succeeded");
                    return Ok(response.body);
                }
                Ok(response) if response.status == 429 => {
                    rate_limited = true;
                    if attempt + 1 < attempts {
                        let delay = self.policy.rate_limit_delay(attempt);
                        warn!(url, attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(response) if response.is_server_error() => {
                    rate_limited = false;
                    last_message = format!("status {}", response.status);
                    if attempt + 1 < attempts {
                        let delay = self.policy.retry_delay(attempt);
                        warn!(url, attempt, status = response.status, "server error, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(response) => {
                    return Err(ApiError::Status {
                        status: response.status,
                        body: String::from_utf8_lossy(&response.body).into_owned(),
                    });
                }
                Err(err) => {
                    rate_limited = false;
                    last_message = err.to_string();
                    if attempt + 1 < attempts {
                        let delay = self.policy.retry_delay(attempt);
                        warn!(url, attempt, error = %err, "request failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        if rate_limited {
            Err(ApiError::RateLimited { attempts })
        } else {
            Err(ApiError::Exhausted {
                attempts,
                message: last_message,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Scoreboard API payloads, trimmed to the fields the pipeline consumes.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Scoreboard {
    pub season: ScoreboardSeason,
    #[serde(default)]
    pub events: Vec<ScoreboardEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreboardSeason {
    pub year: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreboardEvent {
    pub id: String,
    pub date: String,
    pub week: ScoreboardWeek,
    #[serde(default)]
    pub competitions: Vec<Competition>,
    pub status: EventStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreboardWeek {
    pub number: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventStatus {
    #[serde(rename = "type")]
    pub state: StatusType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusType {
    pub name: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Competition {
    #[serde(default)]
    pub competitors: Vec<Competitor>,
    #[serde(default)]
    pub venue: Option<Venue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Venue {
    #[serde(rename = "fullName")]
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Competitor {
    #[serde(rename = "homeAway")]
    pub home_away: String,
    pub team: TeamInfo,
    #[serde(default)]
    pub score: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamInfo {
    pub id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub name: String,
    pub abbreviation: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamsPayload {
    #[serde(default)]
    pub teams: Vec<TeamInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterPayload {
    pub team: TeamInfo,
    #[serde(default)]
    pub athletes: Vec<Athlete>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Athlete {
    pub id: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    #[serde(default)]
    pub position: Option<AthletePosition>,
    #[serde(default)]
    pub jersey: Option<String>,
    #[serde(default)]
    pub status: Option<AthleteStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AthletePosition {
    pub abbreviation: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AthleteStatus {
    pub name: String,
}

impl Scoreboard {
    /// Flatten scoreboard events into schedule rows. Events missing a home or
    /// away competitor are dropped here; the upsert engine never sees them.
    pub fn schedule_rows(&self) -> Vec<ScheduleRow> {
        self.events
            .iter()
            .filter_map(|event| {
                let competition = event.competitions.first()?;
                let home = competition.competitors.iter().find(|c| c.home_away == "home")?;
                let away = competition.competitors.iter().find(|c| c.home_away == "away")?;
                Some(ScheduleRow {
                    season: self.season.year,
                    game_type: "REG".into(),
                    week: event.week.number,
                    game_id: event.id.clone(),
                    game_day: event.date.chars().take(10).collect(),
                    away_team: away.team.abbreviation.clone(),
                    away_score: away.score.parse().ok(),
                    home_team: home.team.abbreviation.clone(),
                    home_score: home.score.parse().ok(),
                    stadium: competition.venue.as_ref().map(|v| v.full_name.clone()),
                    temp: None,
                })
            })
            .collect()
    }
}

impl RosterPayload {
    pub fn roster_rows(&self, season: i32) -> Vec<RosterRow> {
        self.athletes
            .iter()
            .map(|athlete| RosterRow {
                season,
                team_abbr: self.team.abbreviation.clone(),
                position: athlete
                    .position
                    .as_ref()
                    .map(|p| p.abbreviation.clone())
                    .unwrap_or_default(),
                jersey_number: athlete.jersey.as_deref().and_then(|j| j.parse().ok()),
                status: athlete
                    .status
                    .as_ref()
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| "Active".into()),
                full_name: athlete.full_name.clone(),
                birth_date: None,
                height: None,
                weight: None,
                college: None,
                player_id: athlete.id.clone(),
                years_exp: None,
                headshot_url: None,
            })
            .collect()
    }
}

impl TeamInfo {
    pub fn team_row(&self) -> TeamRow {
        TeamRow {
            abbreviation: self.abbreviation.clone(),
            name: if self.display_name.is_empty() {
                self.name.clone()
            } else {
                self.display_name.clone()
            },
            city: self.location.clone(),
            conference: String::new(),
            division: String::new(),
        }
    }
}

/// Typed client over the retry transport for the live scoreboard API.
#[derive(Debug)]
pub struct ScoreboardClient<S = ReqwestSender> {
    transport: ApiTransport<S>,
    base_url: String,
}

impl ScoreboardClient<ReqwestSender> {
    pub fn new(base_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        Ok(Self {
            transport: ApiTransport::new(user_agent, Duration::from_secs(30))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl<S: SendRequest> ScoreboardClient<S> {
    pub fn with_transport(transport: ApiTransport<S>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch_scoreboard(&self, season: i32, week: i32) -> Result<Scoreboard, ApiError> {
        let url = format!(
            "{}/scoreboard?season={season}&week={week}",
            self.base_url
        );
        let body = self.transport.fetch(&url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn fetch_teams(&self) -> Result<TeamsPayload, ApiError> {
        let url = format!("{}/teams", self.base_url);
        let body = self.transport.fetch(&url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn fetch_team_roster(&self, team_id: &str) -> Result<RosterPayload, ApiError> {
        let url = format!("{}/teams/{team_id}/roster", self.base_url);
        let body = self.transport.fetch(&url).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedSender {
        responses: Mutex<Vec<Result<RawResponse, ApiError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSender {
        fn new(responses: Vec<Result<RawResponse, ApiError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SendRequest for &ScriptedSender {
        async fn send(&self, _url: &str) -> Result<RawResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                // Persistent last response once the script runs out.
                Err(ApiError::Transport("script exhausted".into()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn ok(body: &str) -> Result<RawResponse, ApiError> {
        Ok(RawResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
        })
    }

    fn status(code: u16) -> Result<RawResponse, ApiError> {
        Ok(RawResponse {
            status: code,
            body: Vec::new(),
        })
    }

    #[tokio::test]
    async fn two_server_errors_then_success_takes_three_attempts() {
        let sender = ScriptedSender::new(vec![status(500), status(503), ok("payload")]);
        let transport = ApiTransport::with_sender(&sender, RetryPolicy::immediate());

        let body = transport.fetch("http://api/endpoint").await.expect("third attempt wins");
        assert_eq!(body, b"payload");
        assert_eq!(sender.calls(), 3);
    }

    #[tokio::test]
    async fn persistent_rate_limit_exhausts_budget() {
        let sender = ScriptedSender::new(vec![status(429), status(429), status(429), status(429)]);
        let transport = ApiTransport::with_sender(&sender, RetryPolicy::immediate());

        let err = transport.fetch("http://api/endpoint").await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { attempts: 3 }));
        // No calls beyond the attempt budget.
        assert_eq!(sender.calls(), 3);
    }

    #[tokio::test]
    async fn client_error_fails_immediately() {
        let sender = ScriptedSender::new(vec![status(404)]);
        let transport = ApiTransport::with_sender(&sender, RetryPolicy::immediate());

        let err = transport.fetch("http://api/missing").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
        assert_eq!(sender.calls(), 1);
    }

    #[tokio::test]
    async fn network_errors_retry_within_budget() {
        let sender = ScriptedSender::new(vec![
            Err(ApiError::Transport("connection reset".into())),
            ok("{}"),
        ]);
        let transport = ApiTransport::with_sender(&sender, RetryPolicy::immediate());

        transport.fetch("http://api/endpoint").await.expect("second attempt wins");
        assert_eq!(sender.calls(), 2);
    }

    #[test]
    fn retry_delays_are_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_delay(0), Duration::from_secs(1));
        assert_eq!(policy.retry_delay(1), Duration::from_secs(2));
        assert_eq!(policy.rate_limit_delay(0), Duration::from_secs(4));
        assert_eq!(policy.rate_limit_delay(1), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn scoreboard_events_flatten_to_schedule_rows() {
        let json = r#"{
            "season": { "year": 2025 },
            "events": [{
                "id": "401547401",
                "date": "2025-09-07T17:00Z",
                "week": { "number": 1 },
                "status": { "type": { "name": "STATUS_FINAL", "completed": true } },
                "competitions": [{
                    "venue": { "fullName": "Arrowhead Stadium" },
                    "competitors": [
                        { "homeAway": "home", "score": "27", "team": { "id": "12", "abbreviation": "KC" } },
                        { "homeAway": "away", "score": "20", "team": { "id": "8", "abbreviation": "DET" } }
                    ]
                }]
            }]
        }"#;
        let sender = ScriptedSender::new(vec![ok(json)]);
        let transport = ApiTransport::with_sender(&sender, RetryPolicy::immediate());
        let client = ScoreboardClient::with_transport(transport, "http://api");

        let scoreboard = client.fetch_scoreboard(2025, 1).await.expect("parse");
        let rows = scoreboard.schedule_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].game_id, "401547401");
        assert_eq!(rows[0].home_team, "KC");
        assert_eq!(rows[0].home_score, Some(27));
        assert_eq!(rows[0].game_day, "2025-09-07");
        assert_eq!(rows[0].stadium.as_deref(), Some("Arrowhead Stadium"));
    }
}
