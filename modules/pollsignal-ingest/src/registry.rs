//! Candidate-registry seam.
//!
//! Verification and party inference only need two lookups, so the engine
//! talks to the registry through this trait instead of holding a concrete
//! client. `DataGoRegistry` adapts [`datago_client::DataGoClient`];
//! `NoRegistry` is the null implementation for unconfigured deployments and
//! tests, and the scripted variant lives in [`crate::testutil`].

use async_trait::async_trait;
use chrono::NaiveDate;

use datago_client::{CandidateQuery, DataGoClient, DataGoError};
use pollsignal_common::error::PollSignalError;

/// Which slice of the registry to query: election, candidate-type code, and
/// optional region names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryScope {
    pub election_id: String,
    pub sg_typecode: String,
    pub sd_name: Option<String>,
    pub sgg_name: Option<String>,
}

/// Profile fields the registry can contribute to a candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryProfile {
    pub party_name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub job: Option<String>,
    pub career_summary: Option<String>,
}

#[async_trait]
pub trait CandidateRegistry: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Exact-name verification. `Ok(Some(confidence))` on a match,
    /// `Ok(None)` when the registry has no such candidate.
    async fn verify_candidate(
        &self,
        scope: &RegistryScope,
        candidate_name: &str,
        party_name: Option<&str>,
    ) -> Result<Option<f64>, PollSignalError>;

    /// Profile lookup for enrichment and party inference.
    async fn enrich_candidate(
        &self,
        scope: &RegistryScope,
        candidate_name: &str,
    ) -> Result<Option<RegistryProfile>, PollSignalError>;
}

/// Null registry: never configured, never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegistry;

#[async_trait]
impl CandidateRegistry for NoRegistry {
    fn is_configured(&self) -> bool {
        false
    }

    async fn verify_candidate(
        &self,
        _scope: &RegistryScope,
        _candidate_name: &str,
        _party_name: Option<&str>,
    ) -> Result<Option<f64>, PollSignalError> {
        Ok(None)
    }

    async fn enrich_candidate(
        &self,
        _scope: &RegistryScope,
        _candidate_name: &str,
    ) -> Result<Option<RegistryProfile>, PollSignalError> {
        Ok(None)
    }
}

/// Registry backed by the data.go.kr candidate API. Election ids that could
/// not be derived from a matchup id fall back to `default_sg_id`.
pub struct DataGoRegistry {
    client: DataGoClient,
    default_sg_id: String,
}

impl DataGoRegistry {
    pub fn new(client: DataGoClient, default_sg_id: impl Into<String>) -> Self {
        Self {
            client,
            default_sg_id: default_sg_id.into(),
        }
    }

    fn query(&self, scope: &RegistryScope) -> CandidateQuery {
        let sg_id = if scope.election_id.is_empty() || scope.election_id == "unknown" {
            self.default_sg_id.clone()
        } else {
            scope.election_id.clone()
        };
        CandidateQuery {
            sg_id,
            sg_typecode: scope.sg_typecode.clone(),
            sd_name: scope.sd_name.clone(),
            sgg_name: scope.sgg_name.clone(),
        }
    }
}

fn map_registry_error(err: DataGoError) -> PollSignalError {
    PollSignalError::Registry(err.to_string())
}

fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
}

#[async_trait]
impl CandidateRegistry for DataGoRegistry {
    fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    async fn verify_candidate(
        &self,
        scope: &RegistryScope,
        candidate_name: &str,
        party_name: Option<&str>,
    ) -> Result<Option<f64>, PollSignalError> {
        if !self.is_configured() {
            return Ok(None);
        }
        self.client
            .verify_candidate(&self.query(scope), candidate_name, party_name)
            .await
            .map_err(map_registry_error)
    }

    async fn enrich_candidate(
        &self,
        scope: &RegistryScope,
        candidate_name: &str,
    ) -> Result<Option<RegistryProfile>, PollSignalError> {
        if !self.is_configured() {
            return Ok(None);
        }
        let row = self
            .client
            .lookup_candidate(&self.query(scope), candidate_name)
            .await
            .map_err(map_registry_error)?;
        Ok(row.map(|row| RegistryProfile {
            career_summary: row.career_summary(),
            party_name: row.jd_name,
            gender: row.gender,
            birth_date: row.birthday.as_deref().and_then(parse_birth_date),
            job: row.job,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn birth_date_accepts_compact_and_dashed_forms() {
        assert_eq!(
            parse_birth_date("19701203"),
            NaiveDate::from_ymd_opt(1970, 12, 3)
        );
        assert_eq!(
            parse_birth_date("1970-12-03"),
            NaiveDate::from_ymd_opt(1970, 12, 3)
        );
        assert_eq!(parse_birth_date("1970"), None);
    }
}
