//! Game-stats provider client
//!
//! The live implementation talks to the HenrikDev Valorant API. Transport errors,
//! non-success statuses and malformed payloads all surface as
//! `StatsProviderUnavailable`; a 404 or an empty match list is `None`.

use crate::config::StatsProviderSettings;
use crate::error::{Result, ScrimError};
use crate::report::record::{MatchRecord, PlayerPerformance, TeamResult};
use crate::types::RiotId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Source of finished-match data and account lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameStatsProvider: Send + Sync {
    /// Most recent match played by an account, `None` when there is none
    async fn fetch_latest_match(&self, riot_id: &RiotId) -> Result<Option<MatchRecord>>;

    /// Canonical spelling of an account, `None` when it does not exist
    async fn fetch_account(&self, riot_id: &RiotId) -> Result<Option<RiotId>>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiAccount {
    name: String,
    tag: String,
}

#[derive(Debug, Deserialize)]
struct ApiMatch {
    metadata: ApiMetadata,
    #[serde(default)]
    players: Vec<ApiPlayer>,
    #[serde(default)]
    teams: Vec<ApiTeam>,
    #[serde(default)]
    rounds: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiMetadata {
    #[serde(default)]
    match_id: String,
    #[serde(default)]
    map: ApiMap,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    total_rounds: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiMap {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiPlayer {
    name: String,
    tag: String,
    team_id: String,
    #[serde(default)]
    stats: ApiPlayerStats,
}

#[derive(Debug, Default, Deserialize)]
struct ApiPlayerStats {
    #[serde(default)]
    score: u64,
    #[serde(default)]
    kills: u64,
    #[serde(default)]
    deaths: u64,
    #[serde(default)]
    assists: u64,
}

#[derive(Debug, Deserialize)]
struct ApiTeam {
    team_id: String,
    #[serde(default)]
    won: bool,
    #[serde(default)]
    rounds: ApiRounds,
}

#[derive(Debug, Default, Deserialize)]
struct ApiRounds {
    #[serde(default)]
    won: u32,
    #[serde(default)]
    lost: u32,
}

impl From<ApiMatch> for MatchRecord {
    fn from(api: ApiMatch) -> Self {
        // Older payloads omit the round count
        let total_rounds = api
            .metadata
            .total_rounds
            .filter(|rounds| *rounds > 0)
            .unwrap_or(api.rounds.len() as u32);

        MatchRecord {
            match_id: api.metadata.match_id,
            map: api.metadata.map.name,
            started_at: api.metadata.started_at,
            total_rounds,
            players: api
                .players
                .into_iter()
                .map(|p| PlayerPerformance {
                    name: p.name,
                    tag: p.tag,
                    team_id: p.team_id,
                    score: p.stats.score,
                    kills: p.stats.kills,
                    deaths: p.stats.deaths,
                    assists: p.stats.assists,
                })
                .collect(),
            teams: api
                .teams
                .into_iter()
                .map(|t| TeamResult {
                    team_id: t.team_id,
                    won: t.won,
                    rounds_won: t.rounds.won,
                    rounds_lost: t.rounds.lost,
                })
                .collect(),
        }
    }
}

/// Parse a v4 match-list payload into the most recent match
pub fn parse_match_list(body: &str) -> Result<Option<MatchRecord>> {
    let envelope: Envelope<Vec<ApiMatch>> =
        serde_json::from_str(body).map_err(|e| ScrimError::StatsProviderUnavailable {
            message: format!("Malformed match payload: {}", e),
        })?;

    Ok(envelope
        .data
        .and_then(|matches| matches.into_iter().next())
        .map(MatchRecord::from))
}

/// Parse an account lookup payload
pub fn parse_account(body: &str) -> Result<Option<RiotId>> {
    let envelope: Envelope<ApiAccount> =
        serde_json::from_str(body).map_err(|e| ScrimError::StatsProviderUnavailable {
            message: format!("Malformed account payload: {}", e),
        })?;

    Ok(envelope
        .data
        .map(|account| RiotId::new(account.name, account.tag)))
}

/// HenrikDev Valorant API client
pub struct HenrikDevProvider {
    client: Client,
    settings: StatsProviderSettings,
}

impl HenrikDevProvider {
    pub fn new(settings: StatsProviderSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ScrimError::ConfigurationError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        info!(
            "Stats provider configured - base_url: '{}', region: '{}'",
            settings.base_url, settings.region
        );

        Ok(Self { client, settings })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url =
            Url::parse(&self.settings.base_url).map_err(|e| ScrimError::ConfigurationError {
                message: format!("Invalid stats provider URL: {}", e),
            })?;

        url.path_segments_mut()
            .map_err(|_| ScrimError::ConfigurationError {
                message: "Stats provider URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    /// GET a URL; `None` on 404
    async fn get_text(&self, url: Url) -> Result<Option<String>> {
        debug!("Stats provider request - url: '{}'", url);

        let mut request = self.client.get(url.clone());
        if let Some(api_key) = &self.settings.api_key {
            request = request.header(header::AUTHORIZATION, api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScrimError::StatsProviderUnavailable {
                message: format!("Request to stats provider failed: {}", e),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            warn!("Stats provider returned {} - url: '{}'", status, url);
            return Err(ScrimError::StatsProviderUnavailable {
                message: format!("Stats provider returned status {}", status),
            }
            .into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScrimError::StatsProviderUnavailable {
                message: format!("Failed to read stats provider response: {}", e),
            })?;

        Ok(Some(body))
    }
}

#[async_trait]
impl GameStatsProvider for HenrikDevProvider {
    async fn fetch_latest_match(&self, riot_id: &RiotId) -> Result<Option<MatchRecord>> {
        let url = self.endpoint(&[
            "valorant",
            "v4",
            "matches",
            &self.settings.region,
            &self.settings.platform,
            &riot_id.name,
            &riot_id.tag,
        ])?;

        match self.get_text(url).await? {
            Some(body) => parse_match_list(&body),
            None => Ok(None),
        }
    }

    async fn fetch_account(&self, riot_id: &RiotId) -> Result<Option<RiotId>> {
        let url = self.endpoint(&["valorant", "v1", "account", &riot_id.name, &riot_id.tag])?;

        match self.get_text(url).await? {
            Some(body) => parse_account(&body),
            None => Ok(None),
        }
    }
}
