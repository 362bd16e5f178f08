//! Content fingerprint and cross-channel priority merge.
//!
//! Two observations with the same fingerprint describe the same underlying
//! survey regardless of which channel reported it. The fingerprint is
//! invariant to case, whitespace, and date formatting; the merge never
//! silently resolves a disagreement on core identity fields.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use pollsignal_common::error::PollSignalError;
use pollsignal_common::normalize::normalize_text;
use pollsignal_common::types::{PollObservation, SourceChannel};

fn norm_date(value: Option<NaiveDate>) -> String {
    value.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

fn norm_int(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn norm_opt_text(value: Option<&str>) -> String {
    value.map(normalize_text).unwrap_or_default()
}

/// Stable SHA-256 content hash over the survey's identity fields.
pub fn build_fingerprint(observation: &PollObservation) -> String {
    let fields = [
        normalize_text(&observation.pollster),
        norm_opt_text(observation.sponsor.as_deref()),
        norm_date(observation.survey_start_date),
        norm_date(observation.survey_end_date),
        normalize_text(&observation.region_code),
        norm_int(observation.sample_size),
        norm_opt_text(observation.method.as_deref()),
        norm_opt_text(observation.poll_block_id.as_deref()),
    ];
    let base = fields.join("|");
    let digest = Sha256::digest(base.as_bytes());
    format!("{digest:x}")
}

fn core_mismatch<T: PartialEq>(old: &Option<T>, new: &Option<T>) -> bool {
    matches!((old, new), (Some(a), Some(b)) if a != b)
}

fn core_mismatch_text(old: &str, new: &str) -> bool {
    !old.is_empty() && !new.is_empty() && old != new
}

fn pick<T: Clone>(primary: &Option<T>, secondary: &Option<T>) -> Option<T> {
    primary.clone().or_else(|| secondary.clone())
}

fn pick_text(primary: &str, secondary: &str) -> String {
    if primary.is_empty() {
        secondary.to_string()
    } else {
        primary.to_string()
    }
}

fn pick_opt_text(primary: &Option<String>, secondary: &Option<String>) -> Option<String> {
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
    non_empty(primary).or_else(|| non_empty(secondary))
}

/// Merge two reports of the same survey. `article=1 < nesdc=2`; the
/// higher-priority side wins metadata disagreements, while any non-null
/// mismatch on a core identity field is a hard `DuplicateConflict`.
pub fn merge_by_priority(
    existing: &PollObservation,
    incoming: &PollObservation,
) -> Result<PollObservation, PollSignalError> {
    let mut conflicts: Vec<&str> = Vec::new();
    if core_mismatch_text(&existing.region_code, &incoming.region_code) {
        conflicts.push("region_code");
    }
    if core_mismatch_text(&existing.office_type, &incoming.office_type) {
        conflicts.push("office_type");
    }
    if core_mismatch(&existing.survey_start_date, &incoming.survey_start_date) {
        conflicts.push("survey_start_date");
    }
    if core_mismatch(&existing.survey_end_date, &incoming.survey_end_date) {
        conflicts.push("survey_end_date");
    }
    if core_mismatch(&existing.sample_size, &incoming.sample_size) {
        conflicts.push("sample_size");
    }
    if core_mismatch(&existing.poll_block_id, &incoming.poll_block_id) {
        conflicts.push("poll_block_id");
    }
    if !conflicts.is_empty() {
        return Err(PollSignalError::DuplicateConflict(conflicts.join(",")));
    }

    let incoming_wins = incoming.source_channel.priority() > existing.source_channel.priority();
    let (hi, lo) = if incoming_wins {
        (incoming, existing)
    } else {
        (existing, incoming)
    };

    let mut merged = existing.clone();
    merged.pollster = pick_text(&hi.pollster, &lo.pollster);
    merged.sponsor = pick_opt_text(&hi.sponsor, &lo.sponsor);
    merged.method = pick_opt_text(&hi.method, &lo.method);
    merged.survey_start_date = pick(&hi.survey_start_date, &lo.survey_start_date);
    merged.survey_end_date = pick(&hi.survey_end_date, &lo.survey_end_date);
    merged.sample_size = pick(&hi.sample_size, &lo.sample_size);
    merged.response_rate = pick(&hi.response_rate, &lo.response_rate);
    merged.margin_of_error = pick(&hi.margin_of_error, &lo.margin_of_error);
    merged.confidence_level = pick(&hi.confidence_level, &lo.confidence_level);
    merged.region_code = pick_text(&hi.region_code, &lo.region_code);
    merged.office_type = pick_text(&hi.office_type, &lo.office_type);
    merged.matchup_id = pick_text(&hi.matchup_id, &lo.matchup_id);
    merged.audience_scope = pick(&hi.audience_scope, &lo.audience_scope);
    merged.audience_region_code = pick_opt_text(&hi.audience_region_code, &lo.audience_region_code);
    merged.sampling_population_text =
        pick_opt_text(&hi.sampling_population_text, &lo.sampling_population_text);
    merged.legal_completeness_score = pick(&hi.legal_completeness_score, &lo.legal_completeness_score);
    merged.legal_filled_count = pick(&hi.legal_filled_count, &lo.legal_filled_count);
    merged.legal_required_count = pick(&hi.legal_required_count, &lo.legal_required_count);
    merged.date_inference_mode = pick(&hi.date_inference_mode, &lo.date_inference_mode);
    merged.date_inference_confidence =
        pick(&hi.date_inference_confidence, &lo.date_inference_confidence);
    merged.poll_block_id = pick_opt_text(&hi.poll_block_id, &lo.poll_block_id);
    merged.official_release_at = pick(&hi.official_release_at, &lo.official_release_at);

    let mut channels = existing.effective_channels();
    channels.extend(incoming.effective_channels());
    merged.source_channel = if channels.contains(&SourceChannel::Nesdc) {
        SourceChannel::Nesdc
    } else {
        SourceChannel::Article
    };
    merged.source_channels = channels;

    merged.verified = existing.verified || incoming.verified;
    merged.source_grade = if incoming.source_grade.rank() > existing.source_grade.rank() {
        incoming.source_grade
    } else {
        existing.source_grade
    };

    merged.observation_key = pick_text(&existing.observation_key, &incoming.observation_key);
    merged.poll_fingerprint = pick_opt_text(&existing.poll_fingerprint, &incoming.poll_fingerprint);

    // Survey names read better from the article side; keep the article
    // wording whenever the article channel contributes one.
    merged.survey_name = if incoming.source_channel == SourceChannel::Article
        && !incoming.survey_name.trim().is_empty()
    {
        incoming.survey_name.clone()
    } else {
        pick_text(&existing.survey_name, &incoming.survey_name)
    };

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollsignal_common::types::SourceGrade;
    use std::collections::BTreeSet;

    fn observation(key: &str, channel: SourceChannel) -> PollObservation {
        serde_json::from_value(serde_json::json!({
            "observation_key": key,
            "survey_name": "서울시장 가상대결",
            "pollster": "리서치뷰",
            "region_code": "11-000",
            "office_type": "광역자치단체장",
            "matchup_id": "20260603|광역자치단체장|11-000",
            "source_channel": channel.as_str(),
        }))
        .unwrap()
    }

    #[test]
    fn fingerprint_is_invariant_to_case_and_whitespace() {
        let mut a = observation("obs-1", SourceChannel::Article);
        a.pollster = "한국 갤럽".into();
        a.method = Some("전화 면접".into());
        let mut b = observation("obs-2", SourceChannel::Nesdc);
        b.pollster = "  한국  갤럽 ".into();
        b.method = Some("전화   면접".into());
        assert_eq!(build_fingerprint(&a), build_fingerprint(&b));
        assert_eq!(build_fingerprint(&a).len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_sample_size() {
        let mut a = observation("obs-1", SourceChannel::Article);
        let mut b = a.clone();
        a.sample_size = Some(1000);
        b.sample_size = Some(1004);
        assert_ne!(build_fingerprint(&a), build_fingerprint(&b));
    }

    #[test]
    fn core_field_mismatch_is_a_hard_conflict() {
        let mut existing = observation("obs-1", SourceChannel::Article);
        existing.sample_size = Some(1000);
        let mut incoming = observation("obs-1", SourceChannel::Nesdc);
        incoming.sample_size = Some(1004);

        let err = merge_by_priority(&existing, &incoming).unwrap_err();
        match err {
            PollSignalError::DuplicateConflict(detail) => {
                assert!(detail.contains("sample_size"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn nesdc_wins_metadata_and_forces_channel() {
        let mut existing = observation("obs-1", SourceChannel::Article);
        existing.sponsor = Some("서울일보".into());
        existing.method = Some("ARS".into());
        let mut incoming = observation("obs-nesdc", SourceChannel::Nesdc);
        incoming.method = Some("전화면접".into());
        incoming.sample_size = Some(1000);
        incoming.source_grade = SourceGrade::A;

        let merged = merge_by_priority(&existing, &incoming).unwrap();
        assert_eq!(merged.source_channel, SourceChannel::Nesdc);
        assert_eq!(merged.method.as_deref(), Some("전화면접"));
        // article-only fields survive the merge
        assert_eq!(merged.sponsor.as_deref(), Some("서울일보"));
        assert_eq!(merged.sample_size, Some(1000));
        assert_eq!(merged.source_grade, SourceGrade::A);
        assert_eq!(merged.observation_key, "obs-1");
        assert_eq!(
            merged.source_channels,
            BTreeSet::from([SourceChannel::Article, SourceChannel::Nesdc])
        );
    }

    #[test]
    fn article_survey_name_is_kept_over_registry_wording() {
        let mut existing = observation("obs-1", SourceChannel::Nesdc);
        existing.survey_name = "제9회 전국동시지방선거 제3차".into();
        let mut incoming = observation("obs-1", SourceChannel::Article);
        incoming.survey_name = "서울시장 가상대결 김철수 vs 이영희".into();

        let merged = merge_by_priority(&existing, &incoming).unwrap();
        assert_eq!(merged.survey_name, "서울시장 가상대결 김철수 vs 이영희");
    }
}
