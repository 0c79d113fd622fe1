//! Riot Games API client used as the refresh data source.

use crate::data::models::{
    AccountPayload, DomainPayload, MasteryPayload, Player, RankPayload, RankedEntry,
};
use crate::refresh::agent::DataSource;
use crate::refresh::domain::Domain;
use crate::riot::errors::FetchError;
use crate::riot::json::parse_body;
use anyhow::Context;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

const TOKEN_HEADER: &str = "X-Riot-Token";

/// Client-side request budget towards the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiotRateLimit {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RiotRateLimit {
    fn default() -> Self {
        Self {
            requests_per_second: 20,
            burst: 20,
        }
    }
}

/// Platform hosts and the regional cluster that serves their account-v1 lookups.
const PLATFORMS: &[(&str, &str)] = &[
    ("na1", "americas"),
    ("br1", "americas"),
    ("la1", "americas"),
    ("la2", "americas"),
    ("euw1", "europe"),
    ("eun1", "europe"),
    ("tr1", "europe"),
    ("ru", "europe"),
    ("me1", "europe"),
    ("kr", "asia"),
    ("jp1", "asia"),
    ("oc1", "sea"),
    ("ph2", "sea"),
    ("sg2", "sea"),
    ("th2", "sea"),
    ("tw2", "sea"),
    ("vn2", "sea"),
];

/// A known platform host together with its regional routing cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub platform: &'static str,
    pub region: &'static str,
}

impl Route {
    /// Resolve a stored platform id. Unknown platforms never reach a URL.
    pub fn resolve(platform: &str) -> Result<Self, FetchError> {
        PLATFORMS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(platform))
            .map(|&(platform, region)| Route { platform, region })
            .ok_or_else(|| FetchError::UnknownPlatform(platform.to_owned()))
    }
}

/// Human name of a ranked queue identifier.
pub fn queue_name(queue: &str) -> &str {
    match queue {
        "RANKED_SOLO_5x5" => "Solo/Duo",
        "RANKED_FLEX_SR" => "Flex",
        "RANKED_TFT" => "TFT",
        "RANKED_TFT_DOUBLE_UP" => "TFT Double Up",
        other => other,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChampionMastery {
    champion_level: i32,
    champion_points: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeagueEntry {
    queue_type: String,
    tier: String,
    rank: String,
    league_points: i32,
    wins: i32,
    losses: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    game_name: Option<String>,
    tag_line: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Summoner {
    summoner_level: i64,
}

fn mastery_payload(masteries: &[ChampionMastery]) -> MasteryPayload {
    MasteryPayload {
        score: masteries.iter().map(|m| m.champion_level).sum(),
        points: masteries.iter().map(|m| m.champion_points).sum(),
    }
}

fn rank_payload(entries: Vec<LeagueEntry>) -> RankPayload {
    let mut entries: Vec<RankedEntry> = entries
        .into_iter()
        .map(|e| RankedEntry {
            queue: e.queue_type,
            tier: e.tier,
            division: e.rank,
            league_points: e.league_points,
            wins: e.wins,
            losses: e.losses,
        })
        .collect();
    entries.sort_by(|a, b| a.queue.cmp(&b.queue));
    RankPayload { entries }
}

pub struct RiotApi {
    http: reqwest::Client,
    api_key: String,
    limiter: Arc<DefaultDirectRateLimiter>,
    /// Replaces `https://{host}.api.riotgames.com` when set.
    base_url: Option<String>,
}

impl RiotApi {
    pub fn new(api_key: String, rate_limit: RiotRateLimit) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("orianna/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let per_second = NonZeroU32::new(rate_limit.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(rate_limit.burst).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        Ok(Self {
            http,
            api_key,
            limiter: Arc::new(RateLimiter::direct(quota)),
            base_url: None,
        })
    }

    /// Send every request to `base_url` instead of the Riot hosts.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn url(&self, host: &str, path: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}{path}", base.trim_end_matches('/')),
            None => format!("https://{host}.api.riotgames.com{path}"),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, FetchError> {
        self.limiter.until_ready().await;
        trace!(url = %url, "GET");

        let response = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                debug!(url = %url, ?retry_after, "Rate limited by Riot API");
                return Err(FetchError::RateLimited { retry_after });
            }
            s if !s.is_success() => {
                return Err(FetchError::Status {
                    status: s.as_u16(),
                    url,
                });
            }
            _ => {}
        }

        let body = response.text().await?;
        parse_body(&body).map_err(|source| FetchError::ParseFailed { url, source })
    }

    async fn fetch_mastery(&self, route: Route, player: &Player) -> Result<MasteryPayload, FetchError> {
        let url = self.url(
            route.platform,
            &format!(
                "/lol/champion-mastery/v4/champion-masteries/by-puuid/{}",
                player.puuid
            ),
        );
        let masteries: Vec<ChampionMastery> = self.get(url).await?;
        Ok(mastery_payload(&masteries))
    }

    async fn fetch_rank(&self, route: Route, player: &Player) -> Result<RankPayload, FetchError> {
        let url = self.url(
            route.platform,
            &format!("/lol/league/v4/entries/by-puuid/{}", player.puuid),
        );
        let entries: Vec<LeagueEntry> = self.get(url).await?;
        Ok(rank_payload(entries))
    }

    async fn fetch_account(&self, route: Route, player: &Player) -> Result<AccountPayload, FetchError> {
        let account_url = self.url(
            route.region,
            &format!("/riot/account/v1/accounts/by-puuid/{}", player.puuid),
        );
        let summoner_url = self.url(
            route.platform,
            &format!("/lol/summoner/v4/summoners/by-puuid/{}", player.puuid),
        );

        let (account, summoner) = tokio::try_join!(
            self.get::<Account>(account_url),
            self.get::<Summoner>(summoner_url)
        )?;

        // Accounts without a Riot ID still have a summoner; keep the old
        // name instead of blanking it.
        Ok(AccountPayload {
            game_name: account
                .game_name
                .or_else(|| player.game_name.clone())
                .unwrap_or_default(),
            tag_line: account
                .tag_line
                .or_else(|| player.tag_line.clone())
                .unwrap_or_default(),
            summoner_level: summoner.summoner_level,
        })
    }
}

#[async_trait]
impl DataSource for RiotApi {
    async fn fetch(&self, domain: Domain, player: &Player) -> Result<DomainPayload, FetchError> {
        let route = Route::resolve(&player.platform)?;
        match domain {
            Domain::Mastery => self
                .fetch_mastery(route, player)
                .await
                .map(DomainPayload::Mastery),
            Domain::Rank => self.fetch_rank(route, player).await.map(DomainPayload::Rank),
            Domain::Account => self
                .fetch_account(route, player)
                .await
                .map(DomainPayload::Account),
        }
    }
}
