use std::env;

/// Engine configuration loaded from environment variables.
///
/// Only the registry client is configurable; the ingestion engine itself has
/// no tunables beyond the fixed policy constants it ships with.
#[derive(Debug, Clone)]
pub struct Config {
    // Official candidate registry (data.go.kr)
    pub data_go_endpoint_url: String,
    pub data_go_service_key: Option<String>,
    /// Election id used when a matchup id carries none (e.g. "20260603").
    pub data_go_default_sg_id: String,
    pub data_go_timeout_secs: f64,
    pub data_go_max_retries: u32,
    pub data_go_cache_ttl_secs: u64,
    pub data_go_requests_per_sec: f64,
    pub data_go_num_of_rows: u32,
}

impl Config {
    /// Load configuration from environment variables. The service key is
    /// optional: without it the registry tier is skipped entirely.
    pub fn from_env() -> Self {
        Self {
            data_go_endpoint_url: env::var("DATA_GO_CANDIDATE_ENDPOINT_URL").unwrap_or_else(|_| {
                "https://apis.data.go.kr/9760000/PofelcddInfoInqireService/getPofelcddRegistSttusInfoInqire"
                    .to_string()
            }),
            data_go_service_key: env::var("DATA_GO_KR_KEY").ok(),
            data_go_default_sg_id: env::var("DATA_GO_CANDIDATE_SG_ID")
                .unwrap_or_else(|_| "20260603".to_string()),
            data_go_timeout_secs: parse_env("DATA_GO_CANDIDATE_TIMEOUT_SEC", 4.0),
            data_go_max_retries: parse_env("DATA_GO_CANDIDATE_MAX_RETRIES", 2),
            data_go_cache_ttl_secs: parse_env("DATA_GO_CANDIDATE_CACHE_TTL_SEC", 300),
            data_go_requests_per_sec: parse_env("DATA_GO_CANDIDATE_REQUESTS_PER_SEC", 5.0),
            data_go_num_of_rows: parse_env("DATA_GO_CANDIDATE_NUM_OF_ROWS", 300),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, raw = %raw, "unparsable env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
