//! Storage contract the engine requires from its persistence collaborator.
//!
//! The engine never speaks SQL; it writes through this trait and relies on
//! natural-key idempotency: article URL, `observation_key`, candidate id,
//! region code, matchup id, and `(observation, type, name, scenario)` for
//! options. `test-support` ships an in-memory implementation in
//! [`crate::testutil`].

use async_trait::async_trait;

use pollsignal_common::error::PollSignalError;
use pollsignal_common::types::{
    Article, Candidate, Matchup, PollObservation, PollOption, Region, ReviewItem, RunStatus,
};

pub type StoreResult<T> = Result<T, PollSignalError>;

#[async_trait]
pub trait IngestStore: Send + Sync {
    async fn create_run(
        &self,
        run_type: &str,
        extractor_version: &str,
        llm_model: Option<&str>,
    ) -> StoreResult<i64>;

    async fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        processed_count: u32,
        error_count: u32,
    ) -> StoreResult<()>;

    async fn update_run_policy_counters(
        &self,
        run_id: i64,
        date_inference_failed_count: u32,
        date_inference_estimated_count: u32,
    ) -> StoreResult<()>;

    async fn upsert_region(&self, region: &Region) -> StoreResult<()>;

    async fn upsert_matchup(&self, matchup: &Matchup) -> StoreResult<()>;

    /// Idempotent by `candidate_id`. Channel upgrades are monotonic: the
    /// store unions `source_channels` and never drops `nesdc`.
    async fn upsert_candidate(&self, candidate: &Candidate) -> StoreResult<()>;

    /// Idempotent by URL. Returns the article's row id.
    async fn upsert_article(&self, article: &Article) -> StoreResult<i64>;

    /// Fingerprint lookup used before priority merge.
    async fn find_observation_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> StoreResult<Option<PollObservation>>;

    /// Idempotent by `observation_key`. Returns the observation's row id.
    async fn upsert_observation(
        &self,
        observation: &PollObservation,
        article_id: i64,
        run_id: i64,
    ) -> StoreResult<i64>;

    /// Idempotent by `(observation_id, option_type, option_name, scenario_key)`.
    async fn upsert_option(&self, observation_id: i64, option: &PollOption) -> StoreResult<()>;

    /// Previously persisted candidate-matchup rows still under the default
    /// scenario for this observation.
    async fn fetch_candidate_default_options(
        &self,
        observation_id: i64,
    ) -> StoreResult<Vec<PollOption>>;

    /// Purge default-scenario candidate rows once explicit scenarios exist.
    async fn delete_candidate_default_options(&self, observation_id: i64) -> StoreResult<()>;

    async fn insert_review_item(&self, item: &ReviewItem) -> StoreResult<()>;

    /// Discard the current record's partial writes after a hard error.
    async fn rollback(&self) -> StoreResult<()>;
}
