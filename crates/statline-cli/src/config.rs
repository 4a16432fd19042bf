use std::env;
use std::time::Duration;

use anyhow::Context;
use statline_sync::DEFAULT_SYNC_INTERVAL;

const DEFAULT_ARCHIVE_URL: &str =
    "https://github.com/nflverse/nflverse-data/releases/download";
const DEFAULT_SCOREBOARD_URL: &str =
    "https://site.api.espn.com/apis/site/v2/sports/football/nfl";
const DEFAULT_USER_AGENT: &str = "statline/0.1";
const DEFAULT_DB_MAX_CONNS: u32 = 5;

/// Runtime configuration, environment-only. `DATABASE_URL` is the one
/// required variable; everything else has a workable default.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub archive_base_url: String,
    pub scoreboard_base_url: String,
    pub live_interval: Duration,
    pub user_agent: String,
    pub db_max_conns: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let archive_base_url =
            env::var("ARCHIVE_BASE_URL").unwrap_or_else(|_| DEFAULT_ARCHIVE_URL.into());
        let scoreboard_base_url =
            env::var("SCOREBOARD_BASE_URL").unwrap_or_else(|_| DEFAULT_SCOREBOARD_URL.into());
        let user_agent =
            env::var("STATLINE_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.into());
        let live_interval = match env::var("LIVE_SYNC_INTERVAL_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse()
                    .context("LIVE_SYNC_INTERVAL_SECS must be a whole number of seconds")?,
            ),
            Err(_) => DEFAULT_SYNC_INTERVAL,
        };
        let db_max_conns = match env::var("DB_MAX_CONNS") {
            Ok(raw) => raw.parse().context("DB_MAX_CONNS must be an integer")?,
            Err(_) => DEFAULT_DB_MAX_CONNS,
        };

        Ok(Self {
            database_url,
            archive_base_url,
            scoreboard_base_url,
            live_interval,
            user_agent,
            db_max_conns,
        })
    }
}
