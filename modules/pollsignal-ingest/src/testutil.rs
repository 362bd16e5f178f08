//! In-memory test doubles for the storage and registry seams.
//!
//! `MemoryStore` honors the same natural-key idempotency the real store
//! does, so end-to-end tests can assert row counts after repeated ingests.
//! The real store wraps each record in a transaction; the double only
//! counts rollback calls.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use pollsignal_common::types::{
    Article, Candidate, IngestionRun, Matchup, PollObservation, PollOption, Region, ReviewItem,
    RunStatus,
};

use crate::registry::{CandidateRegistry, RegistryProfile, RegistryScope};
use crate::store::{IngestStore, StoreResult};

#[derive(Default)]
struct MemoryState {
    runs: Vec<IngestionRun>,
    regions: HashMap<String, Region>,
    matchups: HashMap<String, Matchup>,
    candidates: HashMap<String, Candidate>,
    articles: Vec<Article>,
    article_ids: HashMap<String, i64>,
    observation_ids: HashMap<String, i64>,
    observations: HashMap<i64, PollObservation>,
    options: HashMap<i64, Vec<PollOption>>,
    reviews: Vec<ReviewItem>,
    rollback_count: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn articles(&self) -> Vec<Article> {
        self.state.lock().unwrap().articles.clone()
    }

    pub fn observations(&self) -> Vec<PollObservation> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<i64> = state.observations.keys().copied().collect();
        ids.sort();
        ids.iter().map(|id| state.observations[id].clone()).collect()
    }

    pub fn observation_by_key(&self, observation_key: &str) -> Option<PollObservation> {
        let state = self.state.lock().unwrap();
        let id = state.observation_ids.get(observation_key)?;
        state.observations.get(id).cloned()
    }

    pub fn options_for(&self, observation_key: &str) -> Vec<PollOption> {
        let state = self.state.lock().unwrap();
        state
            .observation_ids
            .get(observation_key)
            .and_then(|id| state.options.get(id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        let mut rows: Vec<Candidate> = self.state.lock().unwrap().candidates.values().cloned().collect();
        rows.sort_by(|a, b| a.candidate_id.cmp(&b.candidate_id));
        rows
    }

    pub fn matchups(&self) -> Vec<Matchup> {
        let mut rows: Vec<Matchup> = self.state.lock().unwrap().matchups.values().cloned().collect();
        rows.sort_by(|a, b| a.matchup_id.cmp(&b.matchup_id));
        rows
    }

    pub fn regions(&self) -> Vec<Region> {
        self.state.lock().unwrap().regions.values().cloned().collect()
    }

    pub fn reviews(&self) -> Vec<ReviewItem> {
        self.state.lock().unwrap().reviews.clone()
    }

    pub fn runs(&self) -> Vec<IngestionRun> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn rollback_count(&self) -> u32 {
        self.state.lock().unwrap().rollback_count
    }
}

#[async_trait]
impl IngestStore for MemoryStore {
    async fn create_run(
        &self,
        run_type: &str,
        extractor_version: &str,
        llm_model: Option<&str>,
    ) -> StoreResult<i64> {
        let mut state = self.state.lock().unwrap();
        let run_id = state.runs.len() as i64 + 1;
        state.runs.push(IngestionRun {
            run_id,
            run_type: run_type.to_string(),
            extractor_version: extractor_version.to_string(),
            llm_model: llm_model.map(str::to_string),
            status: RunStatus::Running,
            processed_count: 0,
            error_count: 0,
            date_inference_failed_count: 0,
            date_inference_estimated_count: 0,
        });
        Ok(run_id)
    }

    async fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        processed_count: u32,
        error_count: u32,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(run) = state.runs.iter_mut().find(|r| r.run_id == run_id) {
            run.status = status;
            run.processed_count = processed_count;
            run.error_count = error_count;
        }
        Ok(())
    }

    async fn update_run_policy_counters(
        &self,
        run_id: i64,
        date_inference_failed_count: u32,
        date_inference_estimated_count: u32,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(run) = state.runs.iter_mut().find(|r| r.run_id == run_id) {
            run.date_inference_failed_count = date_inference_failed_count;
            run.date_inference_estimated_count = date_inference_estimated_count;
        }
        Ok(())
    }

    async fn upsert_region(&self, region: &Region) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .regions
            .insert(region.region_code.clone(), region.clone());
        Ok(())
    }

    async fn upsert_matchup(&self, matchup: &Matchup) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .matchups
            .insert(matchup.matchup_id.clone(), matchup.clone());
        Ok(())
    }

    async fn upsert_candidate(&self, candidate: &Candidate) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.candidates.get_mut(&candidate.candidate_id) {
            Some(existing) => {
                let mut merged = candidate.clone();
                if merged.party_name.is_none() {
                    merged.party_name = existing.party_name.clone();
                }
                if merged.career_summary.is_none() {
                    merged.career_summary = existing.career_summary.clone();
                }
                if merged.election_history.is_none() {
                    merged.election_history = existing.election_history.clone();
                }
                // channel upgrades are monotonic
                merged
                    .source_channels
                    .extend(existing.source_channels.iter().copied());
                *existing = merged;
            }
            None => {
                state
                    .candidates
                    .insert(candidate.candidate_id.clone(), candidate.clone());
            }
        }
        Ok(())
    }

    async fn upsert_article(&self, article: &Article) -> StoreResult<i64> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.article_ids.get(&article.url) {
            let id = *id;
            if let Some(existing) = state.articles.iter_mut().find(|a| a.url == article.url) {
                *existing = article.clone();
            }
            return Ok(id);
        }
        let id = state.articles.len() as i64 + 1;
        state.article_ids.insert(article.url.clone(), id);
        state.articles.push(article.clone());
        Ok(id)
    }

    async fn find_observation_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> StoreResult<Option<PollObservation>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .observations
            .values()
            .find(|o| o.poll_fingerprint.as_deref() == Some(fingerprint))
            .cloned())
    }

    async fn upsert_observation(
        &self,
        observation: &PollObservation,
        _article_id: i64,
        _run_id: i64,
    ) -> StoreResult<i64> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.observation_ids.get(&observation.observation_key) {
            let id = *id;
            state.observations.insert(id, observation.clone());
            return Ok(id);
        }
        let id = state.observation_ids.len() as i64 + 1;
        state
            .observation_ids
            .insert(observation.observation_key.clone(), id);
        state.observations.insert(id, observation.clone());
        Ok(id)
    }

    async fn upsert_option(&self, observation_id: i64, option: &PollOption) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let rows = state.options.entry(observation_id).or_default();
        let key = (
            option.option_type,
            option.option_name.clone(),
            option.scenario_key.clone(),
        );
        match rows.iter_mut().find(|r| {
            (r.option_type, r.option_name.clone(), r.scenario_key.clone()) == key
        }) {
            Some(existing) => *existing = option.clone(),
            None => rows.push(option.clone()),
        }
        Ok(())
    }

    async fn fetch_candidate_default_options(
        &self,
        observation_id: i64,
    ) -> StoreResult<Vec<PollOption>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .options
            .get(&observation_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.option_type.is_candidate_like() && r.is_default_scenario())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_candidate_default_options(&self, observation_id: i64) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(rows) = state.options.get_mut(&observation_id) {
            rows.retain(|r| !(r.option_type.is_candidate_like() && r.is_default_scenario()));
        }
        Ok(())
    }

    async fn insert_review_item(&self, item: &ReviewItem) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.reviews.push(item.clone());
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.rollback_count += 1;
        Ok(())
    }
}

/// Registry double with preset answers keyed by candidate name.
#[derive(Default)]
pub struct ScriptedRegistry {
    verified: HashMap<String, f64>,
    profiles: HashMap<String, RegistryProfile>,
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verified(mut self, name: &str, confidence: f64) -> Self {
        self.verified.insert(name.to_string(), confidence);
        self
    }

    pub fn with_profile(mut self, name: &str, profile: RegistryProfile) -> Self {
        self.profiles.insert(name.to_string(), profile);
        self
    }
}

#[async_trait]
impl CandidateRegistry for ScriptedRegistry {
    fn is_configured(&self) -> bool {
        true
    }

    async fn verify_candidate(
        &self,
        _scope: &RegistryScope,
        candidate_name: &str,
        _party_name: Option<&str>,
    ) -> StoreResult<Option<f64>> {
        Ok(self.verified.get(candidate_name).copied())
    }

    async fn enrich_candidate(
        &self,
        _scope: &RegistryScope,
        candidate_name: &str,
    ) -> StoreResult<Option<RegistryProfile>> {
        Ok(self.profiles.get(candidate_name).cloned())
    }
}
