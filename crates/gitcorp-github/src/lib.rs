//! GitHub API access: credential pool with per-token quota windows,
//! rate-limit probing, and conditional (ETag) profile fetches.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use gitcorp_core::Profile;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "gitcorp-github";

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Floor applied to the exhaustion sleep so a lapsed reset timestamp never
/// turns the wait loop into a busy spin.
const RESET_CUSHION: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub api_base: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            user_agent: "gitcorp-bot/0.1".to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

/// One credential's live quota state for the core API resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaWindow {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RateLimitPayload {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitCore,
}

#[derive(Debug, Deserialize)]
struct RateLimitCore {
    remaining: u64,
    reset: i64,
}

impl From<RateLimitPayload> for QuotaWindow {
    fn from(payload: RateLimitPayload) -> Self {
        Self {
            remaining: payload.resources.core.remaining,
            reset_at: Utc
                .timestamp_opt(payload.resources.core.reset, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

/// Parse a `/rate_limit` response body.
pub fn parse_rate_limit(body: &str) -> Result<QuotaWindow, serde_json::Error> {
    serde_json::from_str::<RateLimitPayload>(body).map(QuotaWindow::from)
}

#[derive(Debug, Deserialize)]
struct ProfilePayload {
    login: String,
    #[serde(default)]
    company: Option<String>,
}

/// Classification of a single profile fetch. Everything except `Fetched`
/// is recoverable for the loop: the row is skipped, the checkpoint still
/// advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(Profile),
    /// 304 against the supplied precondition: profile unchanged.
    NotModified,
    /// 404: account deleted or renamed.
    NotFound,
    Failed {
        status: Option<u16>,
        message: String,
    },
}

/// Strip the weak prefix and quote characters from an ETag header value.
pub fn strip_fingerprint(etag: &str) -> String {
    etag.trim_start_matches("W/").replace('"', "")
}

#[derive(Debug)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Query live quota numbers for one token.
    pub async fn rate_limit(&self, token: &str) -> Result<QuotaWindow, GithubError> {
        let url = format!("{}/rate_limit", self.api_base);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GithubError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let payload: RateLimitPayload = resp.json().await?;
        Ok(QuotaWindow::from(payload))
    }

    /// Fetch one user's public profile, optionally conditional on a cached
    /// fingerprint. All failures are folded into the outcome; nothing here
    /// is fatal to the caller.
    pub async fn fetch_profile(
        &self,
        token: &str,
        login: &str,
        precondition: Option<&str>,
    ) -> FetchOutcome {
        let url = format!("{}/users/{}", self.api_base, login);
        let mut request = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(fingerprint) = precondition {
            request = request.header(header::IF_NONE_MATCH, format!("\"{fingerprint}\""));
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                return FetchOutcome::Failed {
                    status: err.status().map(|s| s.as_u16()),
                    message: err.to_string(),
                }
            }
        };

        match resp.status() {
            StatusCode::NOT_MODIFIED => FetchOutcome::NotModified,
            StatusCode::NOT_FOUND => FetchOutcome::NotFound,
            status if status.is_success() => {
                let fingerprint = resp
                    .headers()
                    .get(header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(strip_fingerprint)
                    .unwrap_or_default();
                match resp.json::<ProfilePayload>().await {
                    Ok(payload) => FetchOutcome::Fetched(Profile {
                        login: payload.login,
                        company: payload.company,
                        fingerprint,
                    }),
                    Err(err) => FetchOutcome::Failed {
                        status: Some(status.as_u16()),
                        message: format!("malformed profile body: {err}"),
                    },
                }
            }
            status => FetchOutcome::Failed {
                status: Some(status.as_u16()),
                message: format!("unexpected status for {url}"),
            },
        }
    }
}

/// Seam over `/rate_limit` so the pool logic is testable without a network.
#[async_trait]
pub trait QuotaProbe: Send + Sync {
    async fn probe(&self, token: &str) -> Result<QuotaWindow, GithubError>;
}

#[async_trait]
impl QuotaProbe for GithubClient {
    async fn probe(&self, token: &str) -> Result<QuotaWindow, GithubError> {
        self.rate_limit(token).await
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no credentials found in token file")]
    Empty,
}

/// One API credential and its last observed quota window.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// A set of independent credentials, each with its own rolling quota
/// window. Multiplies throughput: the roomiest credential sizes each batch.
#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    /// Parse a token file: one opaque token per line, `#` comments and
    /// blank lines skipped. Credentials start fully unknown (zero quota)
    /// until the first probe.
    pub fn seed_from_str(text: &str) -> Result<Self, PoolError> {
        let credentials: Vec<Credential> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|token| Credential {
                token: token.to_string(),
                remaining: 0,
                reset_at: Utc::now(),
            })
            .collect();
        if credentials.is_empty() {
            return Err(PoolError::Empty);
        }
        Ok(Self { credentials })
    }

    /// Load credentials from disk. Fatal when none are available.
    pub async fn seed(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading token file {}", path.display()))?;
        let pool = Self::seed_from_str(&text)
            .with_context(|| format!("seeding credentials from {}", path.display()))?;
        info!(tokens = pool.len(), "seeded GitHub credentials");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Re-probe live quota numbers for every credential. Probe failures
    /// keep the previous numbers; a flaky rate-limit endpoint must not
    /// stall the run.
    pub async fn refresh(&mut self, probe: &dyn QuotaProbe) {
        for cred in &mut self.credentials {
            match probe.probe(&cred.token).await {
                Ok(window) => {
                    cred.remaining = window.remaining;
                    cred.reset_at = window.reset_at;
                }
                Err(err) => {
                    warn!(error = %err, "rate-limit probe failed, keeping previous quota numbers");
                }
            }
        }
    }

    /// Block until at least one credential has quota. When every window is
    /// exhausted this sleeps until the nearest reset, then re-probes live
    /// numbers before reporting. Returns `false` only for an empty pool.
    pub async fn ensure_quota(&mut self, probe: &dyn QuotaProbe) -> bool {
        loop {
            if self.credentials.iter().any(|c| c.remaining > 0) {
                return true;
            }
            let now = Utc::now();
            if self.credentials.iter().any(|c| c.reset_at <= now) {
                // A window already lapsed; live numbers may have recovered.
                self.refresh(probe).await;
                if self.credentials.iter().any(|c| c.remaining > 0) {
                    return true;
                }
            }
            let Some(nearest) = self.credentials.iter().map(|c| c.reset_at).min() else {
                return false;
            };
            let wait = (nearest - Utc::now()).to_std().unwrap_or_default() + RESET_CUSHION;
            info!(
                wait_secs = wait.as_secs(),
                "all credentials exhausted, sleeping until quota reset"
            );
            tokio::time::sleep(wait).await;
            self.refresh(probe).await;
        }
    }

    /// The credential with the most remaining calls. `refresh` re-probes
    /// the pool first, quietly (debug level only).
    pub async fn roomiest(&mut self, probe: &dyn QuotaProbe, refresh: bool) -> Option<Credential> {
        if refresh {
            self.refresh(probe).await;
            debug!("refreshed credential pool before selection");
        }
        self.credentials
            .iter()
            .max_by_key(|c| c.remaining)
            .cloned()
    }
}
