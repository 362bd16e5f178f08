use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// --- Enums ---

/// Channel a poll observation was sourced from. `Nesdc` is the official
/// disclosure registry and always outranks self-reported article data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceChannel {
    Article,
    Nesdc,
}

impl SourceChannel {
    pub fn priority(&self) -> u8 {
        match self {
            SourceChannel::Article => 1,
            SourceChannel::Nesdc => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceChannel::Article => "article",
            SourceChannel::Nesdc => "nesdc",
        }
    }
}

impl std::fmt::Display for SourceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Survey reliability grade. A is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceGrade {
    A,
    B,
    C,
    D,
}

impl SourceGrade {
    /// Rank for merge resolution; higher wins.
    pub fn rank(&self) -> u8 {
        match self {
            SourceGrade::A => 4,
            SourceGrade::B => 3,
            SourceGrade::C => 2,
            SourceGrade::D => 1,
        }
    }
}

/// Geographic population a survey result applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceScope {
    National,
    Regional,
    Local,
}

impl AudienceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudienceScope::National => "national",
            AudienceScope::Regional => "regional",
            AudienceScope::Local => "local",
        }
    }
}

impl std::fmt::Display for AudienceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
    Sido,
    Sigungu,
}

/// What a poll option measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Candidate,
    CandidateMatchup,
    PartySupport,
    PresidentJobApproval,
    ElectionFrame,
    PresidentialApproval,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Candidate => "candidate",
            OptionType::CandidateMatchup => "candidate_matchup",
            OptionType::PartySupport => "party_support",
            OptionType::PresidentJobApproval => "president_job_approval",
            OptionType::ElectionFrame => "election_frame",
            OptionType::PresidentialApproval => "presidential_approval",
        }
    }

    /// Option types that denote a named candidate and go through
    /// verification and party inference.
    pub fn is_candidate_like(&self) -> bool {
        matches!(self, OptionType::Candidate | OptionType::CandidateMatchup)
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    HeadToHead,
    MultiCandidate,
}

/// How the survey window dates were determined by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateInferenceMode {
    Exact,
    EstimatedTimestamp,
    StrictFailBlocked,
    Failed,
}

impl DateInferenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateInferenceMode::Exact => "exact",
            DateInferenceMode::EstimatedTimestamp => "estimated_timestamp",
            DateInferenceMode::StrictFailBlocked => "strict_fail_blocked",
            DateInferenceMode::Failed => "failed",
        }
    }
}

/// Fixed review-queue issue taxonomy. `DuplicateConflict` keeps its legacy
/// upper-case wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewIssue {
    DiscoverError,
    FetchError,
    ClassifyError,
    ExtractError,
    MappingError,
    IngestionError,
    PartyInferenceLowConfidence,
    MetadataCrossContamination,
    #[serde(rename = "DUPLICATE_CONFLICT")]
    DuplicateConflict,
}

impl ReviewIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewIssue::DiscoverError => "discover_error",
            ReviewIssue::FetchError => "fetch_error",
            ReviewIssue::ClassifyError => "classify_error",
            ReviewIssue::ExtractError => "extract_error",
            ReviewIssue::MappingError => "mapping_error",
            ReviewIssue::IngestionError => "ingestion_error",
            ReviewIssue::PartyInferenceLowConfidence => "party_inference_low_confidence",
            ReviewIssue::MetadataCrossContamination => "metadata_cross_contamination",
            ReviewIssue::DuplicateConflict => "DUPLICATE_CONFLICT",
        }
    }
}

impl std::fmt::Display for ReviewIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    PartialSuccess,
}

// --- Entities ---

/// A news article carrying one or more poll reports. Identity is the URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub publisher: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub raw_hash: Option<String>,
}

/// Administrative region. `SS-000` codes are province/metro level, anything
/// else a sub-region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub region_code: String,
    pub sido_name: String,
    pub sigungu_name: String,
    pub admin_level: AdminLevel,
    #[serde(default)]
    pub parent_region_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: String,
    pub name_ko: String,
    #[serde(default)]
    pub party_name: Option<String>,
    #[serde(default)]
    pub party_inferred: bool,
    #[serde(default)]
    pub party_inference_source: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub career_summary: Option<String>,
    #[serde(default)]
    pub election_history: Option<String>,
    /// Channels that have ever contributed this candidate. Upgrades are
    /// monotonic: once `nesdc` is present it is never removed.
    #[serde(default)]
    pub source_channels: BTreeSet<SourceChannel>,
}

/// A matchup (race) a survey measures: one election, office, and region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matchup {
    pub matchup_id: String,
    pub election_id: String,
    pub office_type: String,
    pub region_code: String,
    pub title: String,
    pub is_active: bool,
}

/// One report of an underlying survey. `observation_key` is the idempotency
/// key; `poll_fingerprint` links reports of the same survey across channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollObservation {
    pub observation_key: String,
    pub survey_name: String,
    pub pollster: String,
    #[serde(default)]
    pub sponsor: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub survey_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub survey_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub sample_size: Option<i64>,
    #[serde(default)]
    pub response_rate: Option<f64>,
    #[serde(default)]
    pub margin_of_error: Option<f64>,
    #[serde(default)]
    pub confidence_level: Option<f64>,
    pub region_code: String,
    pub office_type: String,
    pub matchup_id: String,
    #[serde(default)]
    pub audience_scope: Option<AudienceScope>,
    /// Null iff `audience_scope` is national; otherwise equal to or an
    /// ancestor of `region_code`.
    #[serde(default)]
    pub audience_region_code: Option<String>,
    #[serde(default)]
    pub sampling_population_text: Option<String>,
    #[serde(default)]
    pub legal_completeness_score: Option<f64>,
    #[serde(default)]
    pub legal_filled_count: Option<i32>,
    #[serde(default)]
    pub legal_required_count: Option<i32>,
    #[serde(default)]
    pub date_inference_mode: Option<DateInferenceMode>,
    #[serde(default)]
    pub date_inference_confidence: Option<f64>,
    #[serde(default)]
    pub poll_block_id: Option<String>,
    #[serde(default)]
    pub poll_fingerprint: Option<String>,
    #[serde(default)]
    pub official_release_at: Option<DateTime<Utc>>,
    #[serde(default = "default_source_channel")]
    pub source_channel: SourceChannel,
    #[serde(default)]
    pub source_channels: BTreeSet<SourceChannel>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default = "default_source_grade")]
    pub source_grade: SourceGrade,
}

fn default_source_channel() -> SourceChannel {
    SourceChannel::Article
}

fn default_source_grade() -> SourceGrade {
    SourceGrade::C
}

impl PollObservation {
    /// Channels contributing this observation; falls back to the scalar
    /// channel when the set was never populated.
    pub fn effective_channels(&self) -> BTreeSet<SourceChannel> {
        if self.source_channels.is_empty() {
            BTreeSet::from([self.source_channel])
        } else {
            self.source_channels.clone()
        }
    }
}

/// Raw option row as produced by the extractor. `option_type` is a free-form
/// string until classification maps it onto [`OptionType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOptionInput {
    pub option_type: String,
    pub option_name: String,
    #[serde(default)]
    pub candidate_id: Option<String>,
    #[serde(default)]
    pub party_name: Option<String>,
    #[serde(default)]
    pub scenario_key: Option<String>,
    #[serde(default)]
    pub scenario_type: Option<ScenarioType>,
    #[serde(default)]
    pub scenario_title: Option<String>,
    #[serde(default)]
    pub value_raw: Option<String>,
    #[serde(default)]
    pub value_min: Option<f64>,
    #[serde(default)]
    pub value_max: Option<f64>,
    #[serde(default)]
    pub value_mid: Option<f64>,
    #[serde(default)]
    pub is_missing: bool,
    #[serde(default)]
    pub poll_block_id: Option<String>,
    #[serde(default)]
    pub party_inferred: bool,
    #[serde(default)]
    pub party_inference_source: Option<String>,
    #[serde(default)]
    pub party_inference_confidence: Option<f64>,
    #[serde(default)]
    pub party_inference_evidence: Option<String>,
    #[serde(default)]
    pub needs_manual_review: bool,
}

/// A classified, normalized option belonging to one observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub option_type: OptionType,
    pub option_name: String,
    #[serde(default)]
    pub candidate_id: Option<String>,
    #[serde(default)]
    pub party_name: Option<String>,
    pub scenario_key: String,
    #[serde(default)]
    pub scenario_type: Option<ScenarioType>,
    #[serde(default)]
    pub scenario_title: Option<String>,
    #[serde(default)]
    pub value_raw: Option<String>,
    #[serde(default)]
    pub value_min: Option<f64>,
    #[serde(default)]
    pub value_max: Option<f64>,
    #[serde(default)]
    pub value_mid: Option<f64>,
    #[serde(default)]
    pub is_missing: bool,
    #[serde(default)]
    pub poll_block_id: Option<String>,
    #[serde(default)]
    pub party_inferred: bool,
    #[serde(default)]
    pub party_inference_source: Option<String>,
    #[serde(default)]
    pub party_inference_confidence: Option<f64>,
    #[serde(default)]
    pub party_inference_evidence: Option<String>,
    #[serde(default)]
    pub candidate_verified: bool,
    #[serde(default)]
    pub candidate_verify_source: Option<String>,
    #[serde(default)]
    pub candidate_verify_confidence: Option<f64>,
    #[serde(default)]
    pub candidate_verify_matched_key: Option<String>,
    #[serde(default)]
    pub needs_manual_review: bool,
}

impl PollOption {
    pub fn is_default_scenario(&self) -> bool {
        let key = self.scenario_key.trim();
        key.is_empty() || key == "default"
    }
}

// --- Batch input ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub article: Article,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub observation: PollObservation,
    pub options: Vec<PollOptionInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBatch {
    #[serde(default = "default_run_type")]
    pub run_type: String,
    #[serde(default = "default_extractor_version")]
    pub extractor_version: String,
    #[serde(default)]
    pub llm_model: Option<String>,
    pub records: Vec<IngestRecord>,
}

fn default_run_type() -> String {
    "manual".to_string()
}

fn default_extractor_version() -> String {
    "manual-v1".to_string()
}

// --- Run accounting ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRun {
    pub run_id: i64,
    pub run_type: String,
    pub extractor_version: String,
    #[serde(default)]
    pub llm_model: Option<String>,
    pub status: RunStatus,
    pub processed_count: u32,
    pub error_count: u32,
    pub date_inference_failed_count: u32,
    pub date_inference_estimated_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub entity_type: String,
    pub entity_id: String,
    pub issue_type: ReviewIssue,
    pub review_note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_channel_priority_orders_nesdc_above_article() {
        assert!(SourceChannel::Nesdc.priority() > SourceChannel::Article.priority());
    }

    #[test]
    fn source_grade_rank_is_descending_from_a() {
        assert!(SourceGrade::A.rank() > SourceGrade::B.rank());
        assert!(SourceGrade::B.rank() > SourceGrade::C.rank());
        assert!(SourceGrade::C.rank() > SourceGrade::D.rank());
    }

    #[test]
    fn review_issue_duplicate_conflict_keeps_legacy_wire_string() {
        let s = serde_json::to_string(&ReviewIssue::DuplicateConflict).unwrap();
        assert_eq!(s, "\"DUPLICATE_CONFLICT\"");
        assert_eq!(ReviewIssue::DuplicateConflict.as_str(), "DUPLICATE_CONFLICT");
    }

    #[test]
    fn observation_effective_channels_falls_back_to_scalar() {
        let json = serde_json::json!({
            "observation_key": "obs-1",
            "survey_name": "서울시장 가상대결",
            "pollster": "리서치A",
            "region_code": "11-000",
            "office_type": "광역자치단체장",
            "matchup_id": "20260603|광역자치단체장|11-000",
            "source_channel": "nesdc"
        });
        let obs: PollObservation = serde_json::from_value(json).unwrap();
        assert_eq!(
            obs.effective_channels(),
            BTreeSet::from([SourceChannel::Nesdc])
        );
    }
}
