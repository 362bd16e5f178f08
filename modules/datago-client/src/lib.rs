//! Pure REST client for the official candidate registry (data.go.kr).
//!
//! One client instance owns its own response cache and rate limiter, so a
//! burst of verification lookups from the ingestion engine degrades to
//! throttled, serialized requests instead of hammering the upstream API.

pub mod error;
pub mod types;

pub use error::{DataGoError, Result};
pub use types::{parse_candidate_rows, CandidateQuery, CandidateRow};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DataGoConfig {
    pub endpoint_url: String,
    pub service_key: Option<String>,
    pub timeout: Duration,
    /// Additional attempts after the first, for transient failures only.
    pub max_retries: u32,
    pub cache_ttl: Duration,
    pub requests_per_sec: f64,
    pub num_of_rows: u32,
}

impl Default for DataGoConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            service_key: None,
            timeout: Duration::from_secs(4),
            max_retries: 2,
            cache_ttl: Duration::from_secs(300),
            requests_per_sec: 5.0,
            num_of_rows: 300,
        }
    }
}

struct ClientState {
    cache: HashMap<CandidateQuery, (Instant, Arc<Vec<CandidateRow>>)>,
    next_allowed_at: Instant,
}

pub struct DataGoClient {
    http: reqwest::Client,
    config: DataGoConfig,
    state: Mutex<ClientState>,
}

impl DataGoClient {
    pub fn new(config: DataGoConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            state: Mutex::new(ClientState {
                cache: HashMap::new(),
                next_allowed_at: Instant::now(),
            }),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.endpoint_url.is_empty()
            && self
                .config
                .service_key
                .as_deref()
                .is_some_and(|k| !k.is_empty())
    }

    /// Fetch candidate rows for a query scope, served from the TTL cache
    /// when possible.
    pub async fn fetch_candidates(&self, query: &CandidateQuery) -> Result<Arc<Vec<CandidateRow>>> {
        if !self.is_configured() {
            return Err(DataGoError::NotConfigured);
        }

        {
            let state = self.state.lock().expect("datago client state poisoned");
            if let Some((expires_at, rows)) = state.cache.get(query) {
                if *expires_at > Instant::now() {
                    return Ok(rows.clone());
                }
            }
        }

        let rows = Arc::new(self.fetch_with_retry(query).await?);
        let mut state = self.state.lock().expect("datago client state poisoned");
        state
            .cache
            .insert(query.clone(), (Instant::now() + self.config.cache_ttl, rows.clone()));
        Ok(rows)
    }

    /// Verify a candidate name against the registry. Returns the match
    /// confidence, or `None` when nothing matched.
    pub async fn verify_candidate(
        &self,
        query: &CandidateQuery,
        candidate_name: &str,
        party_name: Option<&str>,
    ) -> Result<Option<f64>> {
        let target_name = norm_name(candidate_name);
        if target_name.is_empty() {
            return Ok(None);
        }

        let rows = self.fetch_candidates(query).await?;
        let matched = match match_row(&rows, &target_name, party_name) {
            Some(row) => row,
            None => return Ok(None),
        };

        let target_party = party_name.map(norm_name).filter(|p| !p.is_empty());
        let matched_party = matched.jd_name.as_deref().map(norm_name);
        let confidence = match (target_party, matched_party) {
            (Some(t), Some(m)) if t == m => 0.98,
            (Some(_), Some(_)) => 0.82,
            _ => 0.9,
        };
        Ok(Some(confidence))
    }

    /// Look up a candidate's registry row for profile enrichment.
    pub async fn lookup_candidate(
        &self,
        query: &CandidateQuery,
        candidate_name: &str,
    ) -> Result<Option<CandidateRow>> {
        let target_name = norm_name(candidate_name);
        if target_name.is_empty() {
            return Ok(None);
        }
        let rows = self.fetch_candidates(query).await?;
        Ok(match_row(&rows, &target_name, None).cloned())
    }

    async fn fetch_with_retry(&self, query: &CandidateQuery) -> Result<Vec<CandidateRow>> {
        let attempts = self.config.max_retries + 1;
        let mut last_err: Option<DataGoError> = None;

        for attempt in 0..attempts {
            self.wait_for_rate_limit().await;
            match self.fetch_once(query).await {
                Ok(rows) => return Ok(rows),
                // Empty result set is an answer, not a failure.
                Err(DataGoError::NoData) => return Ok(Vec::new()),
                Err(err) => {
                    let retryable = err.is_retryable();
                    tracing::warn!(
                        attempt,
                        retryable,
                        error = %err,
                        sg_id = %query.sg_id,
                        sg_typecode = %query.sg_typecode,
                        "registry fetch failed"
                    );
                    last_err = Some(err);
                    if !retryable || attempt + 1 >= attempts {
                        break;
                    }
                    let backoff =
                        Duration::from_secs_f64((0.35 * 2f64.powi(attempt as i32)).min(2.0));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Err(last_err.unwrap_or(DataGoError::NotConfigured))
    }

    async fn fetch_once(&self, query: &CandidateQuery) -> Result<Vec<CandidateRow>> {
        let mut params: Vec<(&str, String)> = vec![
            (
                "serviceKey",
                self.config.service_key.clone().unwrap_or_default(),
            ),
            ("pageNo", "1".to_string()),
            ("numOfRows", self.config.num_of_rows.to_string()),
            ("sgId", query.sg_id.clone()),
            ("sgTypecode", query.sg_typecode.clone()),
        ];
        if let Some(sd) = &query.sd_name {
            params.push(("sdName", sd.clone()));
        }
        if let Some(sgg) = &query.sgg_name {
            params.push(("sggName", sgg.clone()));
        }

        let resp = self
            .http
            .get(&self.config.endpoint_url)
            .query(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DataGoError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let raw = resp.text().await?;
        parse_candidate_rows(&raw)
    }

    /// Minimum-interval rate limiting shared by all callers of this client.
    async fn wait_for_rate_limit(&self) {
        let min_interval = Duration::from_secs_f64(1.0 / self.config.requests_per_sec.max(0.1));
        let wait_for = {
            let mut state = self.state.lock().expect("datago client state poisoned");
            let now = Instant::now();
            let wait_for = state.next_allowed_at.saturating_duration_since(now);
            state.next_allowed_at = state.next_allowed_at.max(now) + min_interval;
            wait_for
        };
        if !wait_for.is_zero() {
            tokio::time::sleep(wait_for).await;
        }
    }
}

/// Name key for registry matching: spaces, middle dots, and periods removed,
/// lower-cased.
fn norm_name(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '·' && *c != '.')
        .collect()
}

/// Exact-name match, preferring rows that also agree on party.
fn match_row<'a>(
    rows: &'a [CandidateRow],
    target_name: &str,
    party_name: Option<&str>,
) -> Option<&'a CandidateRow> {
    let target_party = party_name.map(norm_name).filter(|p| !p.is_empty());

    if let Some(party) = &target_party {
        if let Some(row) = rows.iter().find(|r| {
            norm_name(&r.name) == target_name
                && r.jd_name.as_deref().map(norm_name).as_ref() == Some(party)
        }) {
            return Some(row);
        }
    }
    rows.iter().find(|r| norm_name(&r.name) == target_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, party: Option<&str>) -> CandidateRow {
        CandidateRow {
            name: name.to_string(),
            jd_name: party.map(|p| p.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn match_prefers_party_agreement() {
        let rows = vec![row("김철수", Some("미래당")), row("김철수", Some("혁신당"))];
        let matched = match_row(&rows, &norm_name("김철수"), Some("혁신당")).unwrap();
        assert_eq!(matched.jd_name.as_deref(), Some("혁신당"));
    }

    #[test]
    fn match_falls_back_to_name_only() {
        let rows = vec![row("김철수", Some("미래당"))];
        let matched = match_row(&rows, &norm_name("김 철수"), Some("혁신당"));
        assert!(matched.is_some());
    }

    #[test]
    fn norm_name_strips_dots_and_spaces() {
        assert_eq!(norm_name("김 · 철수"), "김철수");
        assert_eq!(norm_name("J. Kim"), "jkim");
    }

    #[test]
    fn unconfigured_client_reports_itself() {
        let client = DataGoClient::new(DataGoConfig::default());
        assert!(!client.is_configured());
    }
}
