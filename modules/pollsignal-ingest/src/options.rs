//! Option normalization and option-type classification.
//!
//! Extractor output carries a free-form `option_type` string and often only a
//! raw percentage string. Normalization maps the type onto the closed enum
//! (disambiguating the legacy `presidential_approval` label by wording),
//! parses the value, and settles the review flag.

use pollsignal_common::normalize::normalize_percentage;
use pollsignal_common::types::{OptionType, PollOption, PollOptionInput};

use crate::verify::PARTY_INFERENCE_REVIEW_THRESHOLD;

/// Wording that marks an election-frame question (국정안정론 vs 국정견제론).
const FRAME_TOKENS: [&str; 8] = [
    "국정안정",
    "국정견제",
    "정권교체",
    "정권재창출",
    "정권심판",
    "정권지원",
    "안정론",
    "견제론",
];
/// Wording that marks a presidential job-approval question.
const APPROVAL_TOKENS: [&str; 3] = ["긍정평가", "부정평가", "직무"];

/// Classify a raw option-type string, using the option name to split the
/// legacy `presidential_approval` label. Returns the type, a review flag,
/// and the reason when classification needs a human look.
pub fn classify_option_type(raw: &str, option_name: &str) -> (OptionType, bool, Option<String>) {
    match raw.trim().to_lowercase().as_str() {
        "candidate" => (OptionType::Candidate, false, None),
        "candidate_matchup" => (OptionType::CandidateMatchup, false, None),
        "party_support" => (OptionType::PartySupport, false, None),
        "president_job_approval" => (OptionType::PresidentJobApproval, false, None),
        "election_frame" => (OptionType::ElectionFrame, false, None),
        "presidential_approval" => {
            let frame = FRAME_TOKENS.iter().any(|t| option_name.contains(t));
            let approval = APPROVAL_TOKENS.iter().any(|t| option_name.contains(t));
            match (frame, approval) {
                (true, false) => (OptionType::ElectionFrame, false, None),
                (false, true) => (OptionType::PresidentJobApproval, false, None),
                (true, true) => (
                    OptionType::PresidentialApproval,
                    true,
                    Some(format!("OPTION_TYPE_AMBIGUOUS_PRESIDENTIAL:{option_name}")),
                ),
                (false, false) => (OptionType::PresidentialApproval, false, None),
            }
        }
        other => (
            OptionType::Candidate,
            true,
            Some(format!("OPTION_TYPE_UNKNOWN:{other}")),
        ),
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Normalize one extractor option row into a typed [`PollOption`]. The
/// second return value is the classification review reason, if any.
pub fn normalize_option(input: &PollOptionInput) -> (PollOption, Option<String>) {
    let scenario_key = trimmed(input.scenario_key.as_deref()).unwrap_or_else(|| "default".into());
    let (option_type, classification_needs_review, classification_reason) =
        classify_option_type(&input.option_type, &input.option_name);

    let (value_min, value_max, value_mid, is_missing) =
        if input.value_min.is_none() && input.value_max.is_none() && input.value_mid.is_none() {
            let parsed = normalize_percentage(input.value_raw.as_deref());
            (parsed.value_min, parsed.value_max, parsed.value_mid, parsed.is_missing)
        } else {
            (input.value_min, input.value_max, input.value_mid, input.is_missing)
        };

    let mut needs_manual_review = input.needs_manual_review;
    if input.party_inferred {
        if let Some(confidence) = input.party_inference_confidence {
            needs_manual_review = confidence < PARTY_INFERENCE_REVIEW_THRESHOLD;
        }
    }
    if classification_needs_review {
        needs_manual_review = true;
    }

    let option = PollOption {
        option_type,
        option_name: input.option_name.trim().to_string(),
        candidate_id: trimmed(input.candidate_id.as_deref()),
        party_name: trimmed(input.party_name.as_deref()),
        scenario_key,
        scenario_type: input.scenario_type,
        scenario_title: trimmed(input.scenario_title.as_deref()),
        value_raw: input.value_raw.clone(),
        value_min,
        value_max,
        value_mid,
        is_missing,
        poll_block_id: trimmed(input.poll_block_id.as_deref()),
        party_inferred: input.party_inferred,
        party_inference_source: trimmed(input.party_inference_source.as_deref()),
        party_inference_confidence: input.party_inference_confidence,
        party_inference_evidence: trimmed(input.party_inference_evidence.as_deref()),
        candidate_verified: false,
        candidate_verify_source: None,
        candidate_verify_confidence: None,
        candidate_verify_matched_key: None,
        needs_manual_review,
    };
    (option, classification_reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(json: serde_json::Value) -> PollOptionInput {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn legacy_presidential_label_splits_by_wording() {
        let (t, review, _) = classify_option_type("presidential_approval", "국정안정론");
        assert_eq!(t, OptionType::ElectionFrame);
        assert!(!review);

        let (t, review, _) = classify_option_type("presidential_approval", "대통령 직무 긍정평가");
        assert_eq!(t, OptionType::PresidentJobApproval);
        assert!(!review);

        let (t, review, reason) =
            classify_option_type("presidential_approval", "국정안정 긍정평가");
        assert_eq!(t, OptionType::PresidentialApproval);
        assert!(review);
        assert!(reason.unwrap().starts_with("OPTION_TYPE_AMBIGUOUS_PRESIDENTIAL"));
    }

    #[test]
    fn unknown_type_is_flagged_for_review() {
        let (t, review, reason) = classify_option_type("mystery_type", "김철수");
        assert_eq!(t, OptionType::Candidate);
        assert!(review);
        assert_eq!(reason.as_deref(), Some("OPTION_TYPE_UNKNOWN:mystery_type"));
    }

    #[test]
    fn raw_value_is_parsed_when_no_explicit_bounds() {
        let (option, _) = normalize_option(&input(serde_json::json!({
            "option_type": "candidate_matchup",
            "option_name": "김철수",
            "value_raw": "53~55%",
        })));
        assert_eq!(option.value_min, Some(53.0));
        assert_eq!(option.value_max, Some(55.0));
        assert_eq!(option.value_mid, Some(54.0));
        assert!(!option.is_missing);
        assert_eq!(option.scenario_key, "default");
    }

    #[test]
    fn low_confidence_prepopulated_inference_flags_review() {
        let (option, _) = normalize_option(&input(serde_json::json!({
            "option_type": "candidate_matchup",
            "option_name": "김철수",
            "party_inferred": true,
            "party_inference_source": "name_rule",
            "party_inference_confidence": 0.55,
        })));
        assert!(option.needs_manual_review);

        let (option, _) = normalize_option(&input(serde_json::json!({
            "option_type": "candidate_matchup",
            "option_name": "김철수",
            "party_inferred": true,
            "party_inference_confidence": 0.9,
        })));
        assert!(!option.needs_manual_review);
    }
}
