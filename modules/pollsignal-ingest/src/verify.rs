//! Candidate verification, party inference, and profile enrichment.
//!
//! Extractors hand us candidate names that range from clean ("김철수") to
//! survey boilerplate that slipped through ("오차범위"). Every candidate-like
//! option is first screened against the noise stoplists, then verified
//! against the official registry, then against the article's own candidate
//! roster. Party inference runs before verification so a failed verify does
//! not discard a usable party signal.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use pollsignal_common::normalize::normalize_candidate_token;
use pollsignal_common::types::{Candidate, PollOption};

use crate::registry::{CandidateRegistry, RegistryProfile, RegistryScope};

/// Inferred parties below this confidence go to the review queue.
pub const PARTY_INFERENCE_REVIEW_THRESHOLD: f64 = 0.8;

const VERIFY_CONFIDENCE_ARTICLE_CONTEXT: f64 = 0.68;
const VERIFY_CONFIDENCE_UNVERIFIED: f64 = 0.2;
const PARTY_CONFIDENCE_SINGLE_CONTEXT: f64 = 0.93;
const PARTY_CONFIDENCE_ENRICH_LOOKUP: f64 = 0.88;

/// Survey boilerplate that exactly equals a would-be candidate token.
const NOISE_EXACT_TOKENS: [&str; 36] = [
    "오차는",
    "응답률은",
    "지지율은",
    "오차범위",
    "표본오차",
    "응답률",
    "조사기관",
    "여론조사",
    "지지율",
    "민주",
    "민주당",
    "더불어민주당",
    "국힘",
    "국민의힘",
    "차이",
    "같은",
    "외",
    "지지",
    "지지도",
    "재정자립도",
    "적합도",
    "선호도",
    "인지도",
    "호감도",
    "비호감도",
    "국정안정론",
    "국정견제론",
    "정권교체",
    "정권재창출",
    "정권심판",
    "정권지원",
    "긍정평가",
    "부정평가",
    "전라",
    "경상",
    "충청",
];

/// Boilerplate fragments that disqualify a token when contained anywhere.
const NOISE_SUBSTRING_TOKENS: [&str; 22] = [
    "오차",
    "오차범위",
    "표본오차",
    "응답률",
    "조사기관",
    "여론조사",
    "지지율",
    "지지도",
    "지지",
    "재정자립",
    "적합도",
    "선호도",
    "안정론",
    "견제론",
    "정권",
    "긍정평가",
    "부정평가",
    "더불어민주당",
    "국민의힘",
    "전라",
    "경상",
    "충청",
];

/// Korean postpositions that stick to names in running text ("김철수는").
const POSTPOSITION_SUFFIXES: [&str; 13] = [
    "은", "는", "이", "가", "을", "를", "와", "과", "의", "도", "만", "로", "에",
];

static HANGUL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[가-힣]{2,8}$").unwrap());

/// Candidate-name tokens that plainly are not person names.
pub fn is_noise_candidate_token(name: &str) -> bool {
    let token = normalize_candidate_token(name);
    if token.is_empty() {
        return true;
    }
    if token.chars().any(|c| c.is_ascii_digit()) || token.contains('%') {
        return true;
    }

    let mut variants: Vec<String> = vec![token.clone()];
    for suffix in POSTPOSITION_SUFFIXES {
        if let Some(stem) = token.strip_suffix(suffix) {
            // keep at least a two-char stem after stripping one postposition
            if token.chars().count() > suffix.chars().count() + 1 {
                variants.push(stem.to_string());
            }
        }
    }

    for variant in &variants {
        if NOISE_EXACT_TOKENS.contains(&variant.as_str()) {
            return true;
        }
        if NOISE_SUBSTRING_TOKENS.iter().any(|t| variant.contains(t)) {
            return true;
        }
    }

    !HANGUL_NAME_RE.is_match(&token)
}

/// Registry candidate-type codes to try for an office, most specific first.
pub fn typecode_ladder(office_type: &str) -> &'static [&'static str] {
    match office_type {
        "광역자치단체장" => &["3", "4"],
        "기초자치단체장" => &["4", "3", "5"],
        _ => &["3", "4", "5"],
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Shared lookup context for one observation's options.
pub struct VerifyContext<'a> {
    pub registry: &'a dyn CandidateRegistry,
    pub election_id: &'a str,
    pub office_type: &'a str,
    pub sd_name: Option<String>,
    pub sgg_name: Option<String>,
    /// Candidate names the article itself declared.
    pub candidate_names: &'a HashSet<String>,
    /// Party mentions per candidate name, counted from the article context.
    pub party_counter: &'a HashMap<String, HashMap<String, u32>>,
}

impl VerifyContext<'_> {
    fn scope(&self, sg_typecode: &str) -> RegistryScope {
        RegistryScope {
            election_id: self.election_id.to_string(),
            sg_typecode: sg_typecode.to_string(),
            sd_name: self.sd_name.clone(),
            sgg_name: self.sgg_name.clone(),
        }
    }
}

/// Verify one option's candidate name. Returns the review reason
/// (`CANDIDATE_TOKEN_NOISE` / `CANDIDATE_NOT_VERIFIED`) when the option
/// needs a human look.
pub async fn apply_candidate_verification(
    ctx: &VerifyContext<'_>,
    option: &mut PollOption,
) -> Option<&'static str> {
    if !option.option_type.is_candidate_like() {
        option.candidate_verified = true;
        option.candidate_verify_source = Some("manual".into());
        option.candidate_verify_confidence = Some(1.0);
        option.candidate_verify_matched_key = None;
        return None;
    }

    let name = normalize_candidate_token(&option.option_name);
    if is_noise_candidate_token(&option.option_name) {
        let key = option
            .candidate_id
            .clone()
            .unwrap_or_else(|| option.option_name.trim().to_string());
        option.candidate_verified = false;
        option.candidate_verify_source = Some("manual".into());
        option.candidate_verify_confidence = Some(0.0);
        option.candidate_verify_matched_key = Some(format!("noise:{key}"));
        option.needs_manual_review = true;
        return Some("CANDIDATE_TOKEN_NOISE");
    }

    if ctx.registry.is_configured() {
        for typecode in typecode_ladder(ctx.office_type) {
            let scope = ctx.scope(typecode);
            match ctx
                .registry
                .verify_candidate(&scope, &name, option.party_name.as_deref())
                .await
            {
                Ok(Some(confidence)) => {
                    option.candidate_verified = true;
                    option.candidate_verify_source = Some("data_go".into());
                    option.candidate_verify_confidence = Some(round3(confidence));
                    option.candidate_verify_matched_key =
                        Some(format!("data_go:{typecode}:{name}"));
                    return None;
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        candidate_name = %name,
                        sg_typecode = typecode,
                        error = %error,
                        "registry verify lookup failed, trying next typecode"
                    );
                }
            }
        }
    }

    if ctx.candidate_names.contains(&name) {
        option.candidate_verified = true;
        option.candidate_verify_source = Some("article_context".into());
        option.candidate_verify_confidence = Some(VERIFY_CONFIDENCE_ARTICLE_CONTEXT);
        option.candidate_verify_matched_key = Some(name);
        return None;
    }

    option.candidate_verified = false;
    option.candidate_verify_source = Some("manual".into());
    option.candidate_verify_confidence = Some(VERIFY_CONFIDENCE_UNVERIFIED);
    option.candidate_verify_matched_key = None;
    option.needs_manual_review = true;
    Some("CANDIDATE_NOT_VERIFIED")
}

fn evidence_json(value: serde_json::Value) -> Option<String> {
    // serde_json's default map keeps keys sorted, so this is canonical
    serde_json::to_string(&value).ok()
}

/// Infer a party for one candidate-like option. Returns `(name, confidence)`
/// when the inference landed below the review threshold.
pub async fn apply_party_inference(
    ctx: &VerifyContext<'_>,
    option: &mut PollOption,
) -> Option<(String, f64)> {
    if !option.option_type.is_candidate_like() {
        return None;
    }
    let name = normalize_candidate_token(&option.option_name);
    if name.is_empty() || is_noise_candidate_token(&option.option_name) {
        return None;
    }

    if let Some(party) = option.party_name.clone() {
        if option.party_inferred && option.party_inference_evidence.is_none() {
            option.party_inference_evidence = evidence_json(serde_json::json!({
                "method": "party_inference_v3",
                "rule": "prepopulated_party_name",
                "party_name": party,
            }));
        }
        return match option.party_inference_confidence {
            Some(confidence)
                if option.party_inferred && confidence < PARTY_INFERENCE_REVIEW_THRESHOLD =>
            {
                option.needs_manual_review = true;
                Some((name, confidence))
            }
            _ => None,
        };
    }

    if let Some(counter) = ctx.party_counter.get(&name) {
        if let Some((selected_party, selected_count)) = counter
            .iter()
            .max_by_key(|(party, count)| (**count, std::cmp::Reverse(party.as_str())))
            .map(|(party, count)| (party.clone(), *count))
        {
            let total_count: u32 = counter.values().sum();
            if total_count > 0 {
                let ratio = f64::from(selected_count) / f64::from(total_count);
                let (confidence, source) = if total_count == 1 {
                    (PARTY_CONFIDENCE_SINGLE_CONTEXT, "official_registry_v3")
                } else {
                    (round3(ratio.clamp(0.55, 0.95)), "incumbent_context_v3")
                };
                option.party_name = Some(selected_party.clone());
                option.party_inferred = true;
                option.party_inference_source = Some(source.into());
                option.party_inference_confidence = Some(confidence);
                option.party_inference_evidence = evidence_json(serde_json::json!({
                    "method": "party_inference_v3",
                    "rule": "candidate_context_counter",
                    "candidate_name": name,
                    "selected_party": selected_party,
                    "candidate_party_counter": counter,
                    "selected_count": selected_count,
                    "total_count": total_count,
                    "support_ratio": (ratio * 10000.0).round() / 10000.0,
                }));
                if confidence < PARTY_INFERENCE_REVIEW_THRESHOLD {
                    option.needs_manual_review = true;
                    return Some((name, confidence));
                }
                return None;
            }
        }
    }

    if ctx.registry.is_configured() {
        for typecode in typecode_ladder(ctx.office_type) {
            let scope = ctx.scope(typecode);
            match ctx.registry.enrich_candidate(&scope, &name).await {
                Ok(Some(profile)) => {
                    if let Some(party) = profile
                        .party_name
                        .as_deref()
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                    {
                        option.party_name = Some(party.to_string());
                        option.party_inferred = true;
                        option.party_inference_source = Some("official_registry_v3".into());
                        option.party_inference_confidence =
                            Some(PARTY_CONFIDENCE_ENRICH_LOOKUP);
                        option.party_inference_evidence = evidence_json(serde_json::json!({
                            "method": "party_inference_v3",
                            "rule": "data_go_enrich_lookup",
                            "candidate_name": name,
                            "party_name": party,
                            "sg_typecode": typecode,
                        }));
                        return None;
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        candidate_name = %name,
                        sg_typecode = typecode,
                        error = %error,
                        "registry enrich lookup failed, trying next typecode"
                    );
                }
            }
        }
    }

    None
}

fn profile_score(profile: &RegistryProfile) -> u32 {
    u32::from(profile.party_name.is_some())
        + u32::from(profile.gender.is_some())
        + u32::from(profile.birth_date.is_some())
        + u32::from(profile.job.is_some())
        + u32::from(profile.career_summary.is_some())
}

fn missing(value: Option<&str>) -> bool {
    value.map(str::trim).is_none_or(str::is_empty)
}

/// Fill a candidate's profile from the registry and report why it still
/// needs manual review, if it does.
pub async fn enrich_candidate_profile(
    ctx: &VerifyContext<'_>,
    candidate: &mut Candidate,
) -> Option<String> {
    if is_noise_candidate_token(&candidate.name_ko) {
        return Some("CANDIDATE_PROFILE_NAME_INVALID".to_string());
    }
    let name = normalize_candidate_token(&candidate.name_ko);

    if ctx.registry.is_configured() {
        let mut best: Option<RegistryProfile> = None;
        for typecode in typecode_ladder(ctx.office_type) {
            let scope = ctx.scope(typecode);
            match ctx.registry.enrich_candidate(&scope, &name).await {
                Ok(Some(profile)) => {
                    if best
                        .as_ref()
                        .is_none_or(|b| profile_score(&profile) > profile_score(b))
                    {
                        best = Some(profile);
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        candidate_name = %name,
                        sg_typecode = typecode,
                        error = %error,
                        "registry profile lookup failed, trying next typecode"
                    );
                }
            }
        }
        if let Some(profile) = best {
            if candidate.party_name.is_none() {
                candidate.party_name = profile.party_name;
            }
            if candidate.gender.is_none() {
                candidate.gender = profile.gender;
            }
            if candidate.birth_date.is_none() {
                candidate.birth_date = profile.birth_date;
            }
            if candidate.job.is_none() {
                candidate.job = profile.job;
            }
            if candidate.career_summary.is_none() {
                candidate.career_summary = profile.career_summary;
            }
        }
    }

    let mut missing_fields = Vec::new();
    if missing(candidate.party_name.as_deref()) {
        missing_fields.push("party_name");
    }
    if missing(candidate.career_summary.as_deref()) {
        missing_fields.push("career_summary");
    }
    if missing(candidate.election_history.as_deref()) {
        missing_fields.push("election_history");
    }
    if missing_fields.is_empty() {
        None
    } else {
        Some(format!(
            "CANDIDATE_PROFILE_INCOMPLETE:{}",
            missing_fields.join(",")
        ))
    }
}
