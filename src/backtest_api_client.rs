use crate::error::ComputationError;
use crate::models::{BacktestResult, ComputationRequest, Configuration, StrategyParameters};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::{Certificate, Identity};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

const COMPUTE_API_MTLS_CA_CERT_ENV: &str = "COMPUTE_API_MTLS_CA_CERT";
const COMPUTE_API_MTLS_CLIENT_CERT_ENV: &str = "COMPUTE_API_MTLS_CLIENT_CERT";
const COMPUTE_API_MTLS_CLIENT_KEY_ENV: &str = "COMPUTE_API_MTLS_CLIENT_KEY";
const SECRET_HEADER: &str = "x-backtest-secret";
const MAX_ERROR_BODY_CHARS: usize = 2048;

/// The remote engine that turns a configuration snapshot into a backtest.
#[async_trait]
pub trait ComputeService: Send + Sync {
    async fn run_backtest(
        &self,
        request: &ComputationRequest,
    ) -> Result<BacktestResult, ComputationError>;
}

fn env_path(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn load_mtls_ca_certificate() -> Result<Option<Certificate>> {
    let Some(path) = env_path(COMPUTE_API_MTLS_CA_CERT_ENV) else {
        return Ok(None);
    };
    let pem = fs::read(&path)
        .with_context(|| format!("failed to read mTLS CA certificate from {}", path))?;
    let certificate = Certificate::from_pem(&pem)
        .with_context(|| format!("failed to parse mTLS CA certificate from {}", path))?;
    Ok(Some(certificate))
}

fn load_mtls_identity() -> Result<Option<Identity>> {
    let cert_path = env_path(COMPUTE_API_MTLS_CLIENT_CERT_ENV);
    let key_path = env_path(COMPUTE_API_MTLS_CLIENT_KEY_ENV);

    match (cert_path, key_path) {
        (None, None) => Ok(None),
        (Some(_), None) | (None, Some(_)) => Err(anyhow!(
            "{} and {} must both be set when enabling API mTLS",
            COMPUTE_API_MTLS_CLIENT_CERT_ENV,
            COMPUTE_API_MTLS_CLIENT_KEY_ENV
        )),
        (Some(cert_path), Some(key_path)) => {
            let cert_pem = fs::read(&cert_path).with_context(|| {
                format!("failed to read mTLS client certificate from {}", cert_path)
            })?;
            let key_pem = fs::read(&key_path)
                .with_context(|| format!("failed to read mTLS client key from {}", key_path))?;

            let mut identity_pem = cert_pem;
            if !identity_pem.ends_with(b"\n") {
                identity_pem.push(b'\n');
            }
            identity_pem.extend_from_slice(&key_pem);

            let identity = Identity::from_pem(&identity_pem).with_context(|| {
                format!(
                    "failed to parse mTLS client identity from {} and {}",
                    cert_path, key_path
                )
            })?;
            Ok(Some(identity))
        }
    }
}

pub fn build_async_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(certificate) = load_mtls_ca_certificate()? {
        builder = builder.add_root_certificate(certificate);
    }
    if let Some(identity) = load_mtls_identity()? {
        builder = builder.identity(identity);
    }
    builder.build().context("failed to build HTTP client")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BacktestRequestBody<'a> {
    symbol: &'a str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    strategy: &'a str,
    params: &'a StrategyParameters,
    fees: f64,
    slippage: f64,
}

impl<'a> From<&'a Configuration> for BacktestRequestBody<'a> {
    fn from(config: &'a Configuration) -> Self {
        Self {
            symbol: &config.symbol,
            start_date: config.start_date,
            end_date: config.end_date,
            strategy: config.strategy.as_str(),
            params: &config.params,
            fees: config.fee_rate,
            slippage: config.slippage_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub exchange: String,
}

impl SymbolMatch {
    fn manual_entry(query: &str) -> Self {
        let symbol = query.trim().to_uppercase();
        Self {
            name: format!("Manual Entry: {}", symbol),
            symbol,
            kind: "Manual".to_string(),
            exchange: "Unknown".to_string(),
        }
    }
}

/// An empty series is a failed computation, never a degenerate success.
pub fn ensure_non_empty(
    result: BacktestResult,
    config: &Configuration,
) -> Result<BacktestResult, ComputationError> {
    if result.records.is_empty() {
        return Err(ComputationError::EmptyData {
            symbol: config.symbol.clone(),
            start: config.start_date,
            end: config.end_date,
        });
    }
    Ok(result)
}

pub struct HttpComputeService {
    client: reqwest::Client,
    base_url: String,
    api_secret: Option<String>,
}

impl HttpComputeService {
    pub fn new(client: reqwest::Client, base_url: &str, api_secret: Option<String>) -> Self {
        let api_secret = api_secret
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_secret,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Look up instruments by free text. When the lookup fails, a plain alphanumeric query
    /// is offered back as a manual entry.
    pub async fn search_symbols(&self, query: &str) -> Vec<SymbolMatch> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        match self.fetch_symbol_matches(query).await {
            Ok(matches) => {
                debug!("Symbol search for {} returned {} matches", query, matches.len());
                matches
            }
            Err(err) => {
                warn!("Symbol search for {} failed: {:#}", query, err);
                if query.chars().all(|c| c.is_ascii_alphanumeric()) {
                    vec![SymbolMatch::manual_entry(query)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    async fn fetch_symbol_matches(&self, query: &str) -> Result<Vec<SymbolMatch>> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", query)])
            .send()
            .await
            .with_context(|| format!("failed to reach {}", url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "symbol search returned {}: {}",
                status,
                truncate_for_log(&body, MAX_ERROR_BODY_CHARS)
            ));
        }
        let matches: Vec<SymbolMatch> = response
            .json()
            .await
            .context("failed to decode symbol search response")?;
        Ok(matches
            .into_iter()
            .filter(|item| !item.symbol.trim().is_empty())
            .collect())
    }
}

#[async_trait]
impl ComputeService for HttpComputeService {
    async fn run_backtest(
        &self,
        request: &ComputationRequest,
    ) -> Result<BacktestResult, ComputationError> {
        let url = format!("{}/backtest", self.base_url);
        let body = BacktestRequestBody::from(request.config.as_ref());

        let mut http_request = self.client.post(&url).json(&body);
        if let Some(secret) = self.api_secret.as_deref() {
            http_request = http_request.header(SECRET_HEADER, secret);
        }
        let response = http_request
            .send()
            .await
            .map_err(|err| ComputationError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Backtest request failed: status={} url={} version={} has_secret={} body={}",
                status,
                url,
                request.version,
                self.api_secret.is_some(),
                truncate_for_log(&body, MAX_ERROR_BODY_CHARS)
            );
            return Err(ComputationError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let result: BacktestResult = response
            .json()
            .await
            .map_err(|err| ComputationError::Decode(err.to_string()))?;
        ensure_non_empty(result, &request.config)
    }
}

pub fn truncate_for_log(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    let mut iter = trimmed.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = iter.next() else {
            return trimmed.to_string();
        };
        out.push(ch);
    }
    if iter.next().is_some() {
        out.push('…');
    }
    out
}
