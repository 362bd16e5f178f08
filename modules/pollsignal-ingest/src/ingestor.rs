//! Batch orchestration: gates, reconciliation, and run accounting.
//!
//! One [`Ingestor::ingest`] call processes a batch record by record. Records
//! blocked by a gate or failing a hard invariant are counted as errors and
//! routed to the review queue; everything else is normalized, merged against
//! the fingerprint index, and persisted. A hard error rolls back only the
//! record that raised it, never the batch.

use std::collections::{HashMap, HashSet};

use pollsignal_common::error::PollSignalError;
use pollsignal_common::normalize::{normalize_candidate_token, to_sido_region_code};
use pollsignal_common::types::{
    AdminLevel, DateInferenceMode, IngestBatch, IngestRecord, Matchup, ReviewIssue, ReviewItem,
    RunStatus,
};

use crate::cutoff::{
    has_article_source, published_at_cutoff_reason, survey_end_cutoff_reason,
    ARTICLE_PUBLISHED_AT_CUTOFF, SURVEY_END_DATE_CUTOFF,
};
use crate::fingerprint::{build_fingerprint, merge_by_priority};
use crate::options::normalize_option;
use crate::registry::{CandidateRegistry, NoRegistry};
use crate::scenario::{
    backfill_multi_from_defaults, detect_scenario_parse_incomplete,
    has_explicit_candidate_scenarios, separate_scenarios,
};
use crate::scope::{
    apply_scope_hardguard, apply_survey_name_correction, infer_election_id,
    resolve_observation_scope, sido_name_for,
};
use crate::store::IngestStore;
use crate::verify::{apply_candidate_verification, apply_party_inference, enrich_candidate_profile, VerifyContext};

const ENTITY_INGEST_RECORD: &str = "ingest_record";
const ENTITY_POLL_OBSERVATION: &str = "poll_observation";

/// Outcome of one full [`Ingestor::ingest`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: i64,
    pub processed_count: u32,
    pub error_count: u32,
    pub status: RunStatus,
}

enum RecordOutcome {
    Processed { date_failed: bool, date_estimated: bool },
    /// Gate rejection counted as an error; review already queued.
    Blocked,
}

pub struct Ingestor<S, R = NoRegistry> {
    store: S,
    registry: R,
}

impl<S: IngestStore> Ingestor<S, NoRegistry> {
    /// Engine without a candidate registry: verification falls back to
    /// article context only.
    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: NoRegistry,
        }
    }
}

impl<S: IngestStore, R: CandidateRegistry> Ingestor<S, R> {
    pub fn with_registry(store: S, registry: R) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the whole batch. Per-record errors are absorbed into the run
    /// accounting; only store failures around run bookkeeping propagate.
    pub async fn ingest(&self, batch: &IngestBatch) -> Result<RunSummary, PollSignalError> {
        let run_id = self
            .store
            .create_run(
                &batch.run_type,
                &batch.extractor_version,
                batch.llm_model.as_deref(),
            )
            .await?;
        tracing::info!(
            run_id,
            run_type = %batch.run_type,
            records = batch.records.len(),
            "ingestion run started"
        );

        let mut processed_count = 0_u32;
        let mut error_count = 0_u32;
        let mut date_failed_count = 0_u32;
        let mut date_estimated_count = 0_u32;

        for record in &batch.records {
            let observation_key = record.observation.observation_key.clone();
            match self.process_record(run_id, record.clone()).await {
                Ok(RecordOutcome::Processed {
                    date_failed,
                    date_estimated,
                }) => {
                    processed_count += 1;
                    if date_failed {
                        date_failed_count += 1;
                    }
                    if date_estimated {
                        date_estimated_count += 1;
                    }
                }
                Ok(RecordOutcome::Blocked) => {
                    error_count += 1;
                }
                Err(error) => {
                    tracing::error!(
                        run_id,
                        observation_key = %observation_key,
                        error = %error,
                        "record failed, rolling back"
                    );
                    if let Err(rollback_error) = self.store.rollback().await {
                        tracing::error!(run_id, error = %rollback_error, "rollback failed");
                    }
                    error_count += 1;
                    let issue = if matches!(error, PollSignalError::DuplicateConflict(_)) {
                        ReviewIssue::DuplicateConflict
                    } else {
                        ReviewIssue::IngestionError
                    };
                    self.note_review(ENTITY_INGEST_RECORD, &observation_key, issue, error.to_string())
                        .await;
                }
            }
        }

        let status = if error_count == 0 {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        };
        self.store
            .finish_run(run_id, status, processed_count, error_count)
            .await?;
        self.store
            .update_run_policy_counters(run_id, date_failed_count, date_estimated_count)
            .await?;
        tracing::info!(
            run_id,
            processed_count,
            error_count,
            status = ?status,
            "ingestion run finished"
        );

        Ok(RunSummary {
            run_id,
            processed_count,
            error_count,
            status,
        })
    }

    async fn process_record(
        &self,
        run_id: i64,
        mut record: IngestRecord,
    ) -> Result<RecordOutcome, PollSignalError> {
        let observation_key = record.observation.observation_key.clone();

        // Gate 1: survey window predates the cycle.
        if let Some(reason) = survey_end_cutoff_reason(record.observation.survey_end_date) {
            let survey_end = record
                .observation
                .survey_end_date
                .map(|d| d.to_string())
                .unwrap_or_default();
            self.note_review(
                ENTITY_INGEST_RECORD,
                &observation_key,
                ReviewIssue::IngestionError,
                format!(
                    "STALE_CYCLE_BLOCK reason={reason} survey_end_date={survey_end} cutoff={}",
                    *SURVEY_END_DATE_CUTOFF
                ),
            )
            .await;
            return Ok(RecordOutcome::Blocked);
        }

        // Gate 2: pre-window article, only when the article channel is in play.
        if has_article_source(&record.observation) {
            if let Some(reason) = published_at_cutoff_reason(record.article.published_at) {
                let published_at = record
                    .article
                    .published_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                tracing::info!(
                    observation_key = %observation_key,
                    %published_at,
                    "blocking pre-cutoff article"
                );
                self.note_review(
                    ENTITY_INGEST_RECORD,
                    &observation_key,
                    ReviewIssue::IngestionError,
                    format!(
                        "ARTICLE_PUBLISHED_AT_CUTOFF_BLOCK reason=old_article_cutoff \
                         policy_reason={reason} published_at={published_at} cutoff={}",
                        ARTICLE_PUBLISHED_AT_CUTOFF.to_rfc3339()
                    ),
                )
                .await;
                return Ok(RecordOutcome::Blocked);
            }
        }

        if let Some(needle) = apply_scope_hardguard(&mut record) {
            tracing::info!(
                observation_key = %observation_key,
                needle,
                "scope hardguard applied"
            );
        }
        apply_survey_name_correction(&mut record.observation, &record.article.title);

        // Scope resolution; a confident declared-vs-text conflict is fatal
        // for the record.
        let resolution = resolve_observation_scope(&record.observation);
        if let Some(reason) = resolution.hard_fail_reason {
            self.note_review(
                ENTITY_POLL_OBSERVATION,
                &observation_key,
                ReviewIssue::MappingError,
                reason,
            )
            .await;
            return Ok(RecordOutcome::Blocked);
        }
        record.observation.audience_scope = resolution.scope;
        record.observation.audience_region_code = resolution.audience_region_code;
        if let Some(reason) = resolution.low_confidence_reason {
            self.note_review(
                ENTITY_POLL_OBSERVATION,
                &observation_key,
                ReviewIssue::MappingError,
                reason,
            )
            .await;
        }

        if let Some(region) = &record.region {
            self.store.upsert_region(region).await?;
        }

        let matchup = Matchup {
            matchup_id: record.observation.matchup_id.clone(),
            election_id: infer_election_id(&record.observation.matchup_id).to_string(),
            office_type: record.observation.office_type.clone(),
            region_code: record.observation.region_code.clone(),
            title: record.observation.survey_name.clone(),
            is_active: true,
        };
        self.store.upsert_matchup(&matchup).await?;

        // Candidate roster: enrich profiles, union in this record's channels,
        // and queue one profile review per candidate at most.
        let channels = record.observation.effective_channels();
        let election_id = infer_election_id(&record.observation.matchup_id).to_string();
        let office_type = record.observation.office_type.clone();
        let sd_name = to_sido_region_code(Some(&record.observation.region_code))
            .as_deref()
            .and_then(sido_name_for)
            .map(str::to_string);
        let sgg_name = record
            .region
            .as_ref()
            .filter(|r| r.admin_level == AdminLevel::Sigungu)
            .map(|r| r.sigungu_name.clone())
            .filter(|name| !name.is_empty() && name != "전체");
        let candidate_names = candidate_name_set(&record);
        let parties = party_counter(&record);
        let verify_ctx = VerifyContext {
            registry: &self.registry,
            election_id: &election_id,
            office_type: &office_type,
            sd_name,
            sgg_name,
            candidate_names: &candidate_names,
            party_counter: &parties,
        };
        let mut enriched_candidates = Vec::with_capacity(record.candidates.len());
        for candidate in &record.candidates {
            let mut candidate = candidate.clone();
            let profile_reason = enrich_candidate_profile(&verify_ctx, &mut candidate).await;
            candidate.source_channels.extend(channels.iter().copied());
            self.store.upsert_candidate(&candidate).await?;
            if let Some(reason) = profile_reason {
                self.note_review(
                    "candidate",
                    &candidate.candidate_id,
                    ReviewIssue::MappingError,
                    format!("candidate profile manual review required: {reason}"),
                )
                .await;
            }
            enriched_candidates.push(candidate);
        }

        let article_id = self.store.upsert_article(&record.article).await?;

        if record.observation.poll_block_id.is_none() {
            record.observation.poll_block_id = Some(observation_key.clone());
        }
        if record.observation.poll_fingerprint.is_none() {
            record.observation.poll_fingerprint = Some(build_fingerprint(&record.observation));
        }

        let (date_failed, date_estimated, date_uncertain) =
            date_inference_flags(&record.observation);

        // Reconcile against a prior report of the same survey.
        let fingerprint = record.observation.poll_fingerprint.clone().unwrap_or_default();
        let mut observation = record.observation.clone();
        if let Some(existing) = self.store.find_observation_by_fingerprint(&fingerprint).await? {
            observation = merge_by_priority(&existing, &observation)?;
        }
        let observation_id = self
            .store
            .upsert_observation(&observation, article_id, run_id)
            .await?;

        // Options: classify, normalize, partition into scenarios, then
        // infer/verify per row.
        let observation_block_id = observation.poll_block_id.clone().unwrap_or_default();
        let mut options = Vec::with_capacity(record.options.len());
        let mut option_type_reasons: Vec<(String, String)> = Vec::new();
        for input in &record.options {
            let (mut option, classification_reason) = normalize_option(input);
            if let Some(reason) = classification_reason {
                option_type_reasons.push((option.option_name.clone(), reason));
            }
            if let Some(block_id) = option.poll_block_id.as_deref() {
                if block_id != observation_block_id {
                    self.note_review(
                        ENTITY_POLL_OBSERVATION,
                        &observation_key,
                        ReviewIssue::MetadataCrossContamination,
                        format!(
                            "POLL_BLOCK_ID_MISMATCH_IN_OBSERVATION \
                             observation_poll_block_id={observation_block_id} \
                             option_poll_block_id={block_id}"
                        ),
                    )
                    .await;
                    option.poll_block_id = Some(observation_block_id.clone());
                }
            }
            options.push(option);
        }

        separate_scenarios(&observation.survey_name, &mut options);
        if has_explicit_candidate_scenarios(&options) {
            let prior_defaults = self
                .store
                .fetch_candidate_default_options(observation_id)
                .await?;
            backfill_multi_from_defaults(&mut options, &prior_defaults);
            self.store
                .delete_candidate_default_options(observation_id)
                .await?;
        }

        if let Some((candidate_count, names)) = detect_scenario_parse_incomplete(
            &observation.survey_name,
            &record.article.title,
            record.article.raw_text.as_deref(),
            &options,
        ) {
            let candidates = if names.is_empty() {
                "-".to_string()
            } else {
                names.join(",")
            };
            self.note_review(
                ENTITY_POLL_OBSERVATION,
                &observation_key,
                ReviewIssue::MappingError,
                format!(
                    "SCENARIO_PARSE_INCOMPLETE candidate_count={candidate_count} \
                     candidates={candidates} matchup_id={}",
                    observation.matchup_id
                ),
            )
            .await;
        }

        let candidate_id_by_name: HashMap<String, String> = enriched_candidates
            .iter()
            .map(|c| (normalize_candidate_token(&c.name_ko), c.candidate_id.clone()))
            .collect();

        let mut low_confidence_parties: Vec<(String, f64)> = Vec::new();
        let mut verify_reasons: Vec<(String, String)> = Vec::new();
        for mut option in options {
            if option.candidate_id.is_none() && option.option_type.is_candidate_like() {
                let name = normalize_candidate_token(&option.option_name);
                option.candidate_id = candidate_id_by_name.get(&name).cloned();
            }
            if let Some(low) = apply_party_inference(&verify_ctx, &mut option).await {
                low_confidence_parties.push(low);
            }
            if let Some(reason) = apply_candidate_verification(&verify_ctx, &mut option).await {
                verify_reasons.push((option.option_name.clone(), reason.to_string()));
            }
            self.store.upsert_option(observation_id, &option).await?;
        }

        if date_uncertain {
            let mode = observation
                .date_inference_mode
                .map(|m| m.as_str())
                .unwrap_or("unknown");
            let confidence = observation.date_inference_confidence.unwrap_or(0.0);
            self.note_review(
                ENTITY_POLL_OBSERVATION,
                &observation_key,
                ReviewIssue::ExtractError,
                format!("date inference uncertainty: mode={mode}, confidence={confidence:.2}"),
            )
            .await;
        }
        if !low_confidence_parties.is_empty() {
            let detail = low_confidence_parties
                .iter()
                .map(|(name, confidence)| format!("{name}:{confidence}"))
                .collect::<Vec<_>>()
                .join(", ");
            self.note_review(
                ENTITY_POLL_OBSERVATION,
                &observation_key,
                ReviewIssue::PartyInferenceLowConfidence,
                format!("party inference confidence below 0.8: {detail}"),
            )
            .await;
        }
        if !option_type_reasons.is_empty() {
            let detail = option_type_reasons
                .iter()
                .map(|(name, reason)| format!("{name}:{reason}"))
                .collect::<Vec<_>>()
                .join(", ");
            self.note_review(
                ENTITY_POLL_OBSERVATION,
                &observation_key,
                ReviewIssue::MappingError,
                format!("option_type manual review required: {detail}"),
            )
            .await;
        }
        if !verify_reasons.is_empty() {
            let detail = verify_reasons
                .iter()
                .map(|(name, reason)| format!("{name}:{reason}"))
                .collect::<Vec<_>>()
                .join(", ");
            self.note_review(
                ENTITY_POLL_OBSERVATION,
                &observation_key,
                ReviewIssue::MappingError,
                format!("candidate verification manual review required: {detail}"),
            )
            .await;
        }

        Ok(RecordOutcome::Processed {
            date_failed,
            date_estimated,
        })
    }

    /// Review inserts are best effort: a failed insert never fails the run.
    async fn note_review(
        &self,
        entity_type: &str,
        entity_id: &str,
        issue_type: ReviewIssue,
        review_note: String,
    ) {
        let item = ReviewItem {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            issue_type,
            review_note,
        };
        if let Err(error) = self.store.insert_review_item(&item).await {
            tracing::warn!(
                entity_type,
                entity_id,
                issue_type = %issue_type,
                error = %error,
                "review item insert failed"
            );
        }
    }
}

fn candidate_name_set(record: &IngestRecord) -> HashSet<String> {
    record
        .candidates
        .iter()
        .map(|c| normalize_candidate_token(&c.name_ko))
        .filter(|n| !n.is_empty())
        .collect()
}

fn party_counter(record: &IngestRecord) -> HashMap<String, HashMap<String, u32>> {
    let mut counter: HashMap<String, HashMap<String, u32>> = HashMap::new();
    for candidate in &record.candidates {
        let name = normalize_candidate_token(&candidate.name_ko);
        if name.is_empty() {
            continue;
        }
        if let Some(party) = candidate
            .party_name
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            *counter
                .entry(name)
                .or_default()
                .entry(party.to_string())
                .or_insert(0) += 1;
        }
    }
    counter
}

/// `(failed, estimated, uncertain)` run-counter flags for one observation.
fn date_inference_flags(
    observation: &pollsignal_common::types::PollObservation,
) -> (bool, bool, bool) {
    let mut failed = false;
    let mut estimated = false;
    let mut uncertain = false;
    match observation.date_inference_mode {
        Some(DateInferenceMode::EstimatedTimestamp) => {
            estimated = true;
            uncertain = true;
        }
        Some(DateInferenceMode::StrictFailBlocked) | Some(DateInferenceMode::Failed) => {
            failed = true;
            uncertain = true;
        }
        _ => {}
    }
    if observation
        .date_inference_confidence
        .is_some_and(|c| c < 0.8)
    {
        uncertain = true;
    }
    (failed, estimated, uncertain)
}
