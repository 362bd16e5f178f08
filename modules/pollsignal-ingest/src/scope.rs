//! Audience-scope resolution and office/region correction.
//!
//! Scope is safety-critical for downstream aggregation: a local sample
//! presented as a national one poisons every national card. Resolution is
//! conservative — a confident disagreement between the declared scope and
//! what the sampling-population text says rejects the whole record.

use std::sync::LazyLock;

use regex::Regex;

use pollsignal_common::normalize::{clean_region_code, compact_text, to_sido_region_code};
use pollsignal_common::types::{
    AdminLevel, AudienceScope, IngestRecord, PollObservation, Region,
};

pub const SCOPE_CONFLICT_THRESHOLD: f64 = 0.8;
pub const SCOPE_LOW_CONFIDENCE_THRESHOLD: f64 = 0.75;

const NATIONAL_TOKENS: [&str; 4] = ["전국", "전국민", "전국거주", "대한민국"];
const REGIONAL_HINT_TOKENS: [&str; 7] = [
    "광역",
    "특별시",
    "광역시",
    "특별자치시",
    "특별자치도",
    "도거주",
    "시도",
];
const LOCAL_HINT_TOKENS: [&str; 5] = ["시군구", "구거주", "군거주", "읍면동", "동거주"];

/// Region-name aliases in the population text, province/metro first, then
/// the sigungu we actually see in field text. Longest alias matched first.
const REGION_ALIASES: [(&str, &str); 60] = [
    ("서울특별시", "11-000"),
    ("서울시", "11-000"),
    ("서울", "11-000"),
    ("부산광역시", "26-000"),
    ("부산시", "26-000"),
    ("부산", "26-000"),
    ("대구광역시", "27-000"),
    ("대구시", "27-000"),
    ("대구", "27-000"),
    ("인천광역시", "28-000"),
    ("인천시", "28-000"),
    ("인천", "28-000"),
    ("광주광역시", "29-000"),
    ("광주시", "29-000"),
    ("광주", "29-000"),
    ("대전광역시", "30-000"),
    ("대전시", "30-000"),
    ("대전", "30-000"),
    ("울산광역시", "31-000"),
    ("울산시", "31-000"),
    ("울산", "31-000"),
    ("세종특별자치시", "36-000"),
    ("세종시", "36-000"),
    ("세종", "36-000"),
    ("경기도", "41-000"),
    ("경기", "41-000"),
    ("강원특별자치도", "42-000"),
    ("강원도", "42-000"),
    ("강원", "42-000"),
    ("충청북도", "43-000"),
    ("충북", "43-000"),
    ("충청남도", "44-000"),
    ("충남", "44-000"),
    ("전북특별자치도", "45-000"),
    ("전라북도", "45-000"),
    ("전북", "45-000"),
    ("전라남도", "46-000"),
    ("전남", "46-000"),
    ("경상북도", "47-000"),
    ("경북", "47-000"),
    ("경상남도", "48-000"),
    ("경남", "48-000"),
    ("제주특별자치도", "50-000"),
    ("제주도", "50-000"),
    ("제주", "50-000"),
    ("강남구", "11-680"),
    ("송파구", "11-710"),
    ("서초구", "11-650"),
    ("기장군", "26-710"),
    ("해운대구", "26-350"),
    ("연수구", "28-450"),
    ("춘천시", "42-110"),
    ("청주시", "43-110"),
    ("천안시", "44-130"),
    ("전주시", "45-110"),
    ("목포시", "46-110"),
    ("포항시", "47-110"),
    ("창원시", "48-110"),
    ("제주시", "50-110"),
    ("서귀포시", "50-130"),
];

static SORTED_REGION_ALIASES: LazyLock<Vec<(&'static str, &'static str)>> = LazyLock::new(|| {
    let mut aliases = REGION_ALIASES.to_vec();
    aliases.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.chars().count()));
    aliases
});

static POPULATION_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:(?:KR-?)?\d{2}(?:-\d{3})?|\d{5})\b").unwrap());

static SURVEY_NAME_OFFICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([가-힣]{2,10})(시장|도지사|지사|교육감)").unwrap());

pub const HARDGUARD_OFFICE_TYPE: &str = "광역자치단체장";

/// Metro-mayor/governor phrases that unambiguously pin the race.
const HARDGUARD_NEEDLES: [(&str, &str); 29] = [
    ("서울시장", "11-000"),
    ("부산시장", "26-000"),
    ("대구시장", "27-000"),
    ("인천시장", "28-000"),
    ("광주시장", "29-000"),
    ("대전시장", "30-000"),
    ("울산시장", "31-000"),
    ("세종시장", "36-000"),
    ("경기도지사", "41-000"),
    ("경기지사", "41-000"),
    ("강원특별자치도지사", "42-000"),
    ("강원도지사", "42-000"),
    ("강원지사", "42-000"),
    ("충청북도지사", "43-000"),
    ("충북지사", "43-000"),
    ("충청남도지사", "44-000"),
    ("충남지사", "44-000"),
    ("전북특별자치도지사", "45-000"),
    ("전라북도지사", "45-000"),
    ("전북지사", "45-000"),
    ("전라남도지사", "46-000"),
    ("전남지사", "46-000"),
    ("경상북도지사", "47-000"),
    ("경북지사", "47-000"),
    ("경상남도지사", "48-000"),
    ("경남지사", "48-000"),
    ("제주특별자치도지사", "50-000"),
    ("제주도지사", "50-000"),
    ("제주지사", "50-000"),
];

const SIDO_NAME_BY_CODE: [(&str, &str); 17] = [
    ("11-000", "서울특별시"),
    ("26-000", "부산광역시"),
    ("27-000", "대구광역시"),
    ("28-000", "인천광역시"),
    ("29-000", "광주광역시"),
    ("30-000", "대전광역시"),
    ("31-000", "울산광역시"),
    ("36-000", "세종특별자치시"),
    ("41-000", "경기도"),
    ("42-000", "강원특별자치도"),
    ("43-000", "충청북도"),
    ("44-000", "충청남도"),
    ("45-000", "전북특별자치도"),
    ("46-000", "전라남도"),
    ("47-000", "경상북도"),
    ("48-000", "경상남도"),
    ("50-000", "제주특별자치도"),
];

/// Official province/metro name for a `SS-000` code.
pub fn sido_name_for(code: &str) -> Option<&'static str> {
    SIDO_NAME_BY_CODE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Election id prefix of a `electionId|officeType|regionCode` matchup id.
pub fn infer_election_id(matchup_id: &str) -> &str {
    if let Some((id, _)) = matchup_id.split_once('|') {
        return id;
    }
    if let Some((id, _)) = matchup_id.split_once(':') {
        return id;
    }
    "unknown"
}

pub fn rebuild_matchup_id(matchup_id: &str, office_type: &str, region_code: &str) -> String {
    format!("{}|{office_type}|{region_code}", infer_election_id(matchup_id))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeResolution {
    pub scope: Option<AudienceScope>,
    pub audience_region_code: Option<String>,
    pub inferred_scope: Option<AudienceScope>,
    pub inferred_region_code: Option<String>,
    pub confidence: f64,
    pub hard_fail_reason: Option<String>,
    pub low_confidence_reason: Option<String>,
}

fn infer_population_region_code(raw: &str, compact: &str) -> Option<String> {
    if let Some(m) = POPULATION_CODE_RE.find(raw) {
        if let Some(code) = clean_region_code(Some(m.as_str())) {
            return Some(code);
        }
    }
    for (alias, code) in SORTED_REGION_ALIASES.iter() {
        if raw.contains(alias) || compact.contains(alias) {
            return Some((*code).to_string());
        }
    }
    None
}

/// Score the sampling-population text against national/regional/local token
/// sets plus the alias-matched region code. Margin >= 2 is a confident read.
fn infer_scope_from_population(
    sampling_population_text: Option<&str>,
) -> (Option<AudienceScope>, Option<String>, f64) {
    let raw = sampling_population_text
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    let compact = compact_text(&raw);
    if raw.is_empty() && compact.is_empty() {
        return (None, None, 0.0);
    }

    let mut national = 0.0_f64;
    let mut regional = 0.0_f64;
    let mut local = 0.0_f64;
    if NATIONAL_TOKENS.iter().any(|t| compact.contains(t)) {
        national += 3.0;
    }
    if REGIONAL_HINT_TOKENS.iter().any(|t| compact.contains(t)) {
        regional += 1.0;
    }
    if LOCAL_HINT_TOKENS.iter().any(|t| compact.contains(t)) {
        local += 1.0;
    }

    let inferred_region_code = infer_population_region_code(&raw, &compact);
    if let Some(code) = &inferred_region_code {
        if code.ends_with("-000") {
            regional += 2.0;
        } else {
            local += 2.0;
        }
    }

    let mut ordered = [
        (AudienceScope::National, national),
        (AudienceScope::Regional, regional),
        (AudienceScope::Local, local),
    ];
    ordered.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (top_scope, top_score) = ordered[0];
    let second_score = ordered[1].1;
    if top_score <= 0.0 {
        return (None, inferred_region_code, 0.0);
    }
    if top_score == second_score {
        return (None, inferred_region_code, 0.6);
    }
    let confidence = if top_score - second_score >= 2.0 { 0.92 } else { 0.8 };
    (Some(top_scope), inferred_region_code, confidence)
}

/// Resolve the observation's final audience scope and region, enforcing the
/// declared-vs-inferred conflict policy.
pub fn resolve_observation_scope(observation: &PollObservation) -> ScopeResolution {
    let explicit_scope = observation.audience_scope;
    let explicit_region_code = clean_region_code(observation.audience_region_code.as_deref());
    let observation_region_code = clean_region_code(Some(&observation.region_code));

    let (inferred_scope, inferred_region_code, confidence) =
        infer_scope_from_population(observation.sampling_population_text.as_deref());

    if let (Some(declared), Some(inferred)) = (explicit_scope, inferred_scope) {
        if declared != inferred && confidence >= SCOPE_CONFLICT_THRESHOLD {
            return ScopeResolution {
                scope: explicit_scope,
                audience_region_code: explicit_region_code,
                inferred_scope,
                inferred_region_code,
                confidence,
                hard_fail_reason: Some(format!(
                    "AUDIENCE_SCOPE_CONFLICT_POPULATION declared={declared} inferred={inferred} \
                     confidence={confidence:.2} sampling_population={}",
                    observation.sampling_population_text.as_deref().unwrap_or("")
                )),
                low_confidence_reason: None,
            };
        }
    }

    let mut final_scope = explicit_scope.or(inferred_scope);
    if final_scope.is_none() {
        if let Some(code) = &observation_region_code {
            final_scope = Some(if code.ends_with("-000") {
                AudienceScope::Regional
            } else {
                AudienceScope::Local
            });
        }
    }

    let mut final_region_code = explicit_region_code.clone();
    match final_scope {
        Some(AudienceScope::National) => final_region_code = None,
        Some(AudienceScope::Regional) | Some(AudienceScope::Local) => {
            if final_region_code.is_none() {
                final_region_code = inferred_region_code.clone();
            }
            if final_region_code.is_none() {
                final_region_code = observation_region_code.clone();
            }
            if final_scope == Some(AudienceScope::Regional) {
                final_region_code = to_sido_region_code(final_region_code.as_deref());
            } else if final_region_code.as_deref().is_some_and(|c| c.ends_with("-000")) {
                // a -000 code under local scope is too wide; narrow to the
                // observation's own sub-region when one exists
                if let Some(obs_code) = &observation_region_code {
                    if !obs_code.ends_with("-000") {
                        final_region_code = Some(obs_code.clone());
                    }
                }
            }
        }
        None => {}
    }

    let region_conflict = match (final_scope, &explicit_region_code, &inferred_region_code) {
        (Some(AudienceScope::Regional), Some(declared), Some(inferred)) => {
            to_sido_region_code(Some(declared)) != to_sido_region_code(Some(inferred))
        }
        (Some(AudienceScope::Local), Some(declared), Some(inferred)) => declared != inferred,
        _ => false,
    };
    if region_conflict && confidence >= SCOPE_CONFLICT_THRESHOLD {
        return ScopeResolution {
            scope: final_scope,
            audience_region_code: final_region_code,
            inferred_scope,
            inferred_region_code: inferred_region_code.clone(),
            confidence,
            hard_fail_reason: Some(format!(
                "AUDIENCE_SCOPE_CONFLICT_REGION declared_region={} inferred_region={} \
                 scope={} confidence={confidence:.2}",
                explicit_region_code.as_deref().unwrap_or("-"),
                inferred_region_code.as_deref().unwrap_or("-"),
                final_scope.map(|s| s.as_str()).unwrap_or("-"),
            )),
            low_confidence_reason: None,
        };
    }

    let low_confidence_reason = if inferred_scope.is_some()
        && confidence < SCOPE_LOW_CONFIDENCE_THRESHOLD
        && explicit_scope.is_none()
    {
        Some(format!(
            "AUDIENCE_SCOPE_LOW_CONFIDENCE inferred={} confidence={confidence:.2} \
             sampling_population={}",
            inferred_scope.map(|s| s.as_str()).unwrap_or("-"),
            observation.sampling_population_text.as_deref().unwrap_or("")
        ))
    } else {
        None
    };

    ScopeResolution {
        scope: final_scope,
        audience_region_code: final_region_code,
        inferred_scope,
        inferred_region_code,
        confidence,
        hard_fail_reason: None,
        low_confidence_reason,
    }
}

/// Scan article title/text and survey name for a hardguard needle. Returns
/// the matched needle when the record was pinned to a metro-level race.
pub fn apply_scope_hardguard(record: &mut IngestRecord) -> Option<&'static str> {
    let haystack = format!(
        "{}{}{}",
        compact_text(&record.article.title),
        compact_text(record.article.raw_text.as_deref().unwrap_or("")),
        compact_text(&record.observation.survey_name),
    );
    if haystack.is_empty() {
        return None;
    }
    let (needle, region_code) = HARDGUARD_NEEDLES
        .iter()
        .find(|(needle, _)| haystack.contains(needle))
        .copied()?;

    let observation = &mut record.observation;
    observation.office_type = HARDGUARD_OFFICE_TYPE.to_string();
    if clean_region_code(Some(&observation.region_code)).as_deref() != Some(region_code) {
        observation.region_code = region_code.to_string();
    }
    observation.matchup_id =
        rebuild_matchup_id(&observation.matchup_id, HARDGUARD_OFFICE_TYPE, region_code);

    if let Some(region) = record.region.as_mut() {
        sync_region_to_sido(region, region_code);
    }
    Some(needle)
}

fn sync_region_to_sido(region: &mut Region, region_code: &str) {
    region.region_code = region_code.to_string();
    if let Some(name) = sido_name_for(region_code) {
        region.sido_name = name.to_string();
    }
    region.sigungu_name = "전체".to_string();
    region.admin_level = AdminLevel::Sido;
    region.parent_region_code = None;
}

/// Map an office phrase in the survey name or title to a region/office pair
/// via the alias table.
fn office_region_from_survey_name(text: &str) -> Option<(String, &'static str)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for caps in SURVEY_NAME_OFFICE_RE.captures_iter(text) {
        let prefix = caps[1].trim();
        let office_token = &caps[2];
        if prefix.is_empty() {
            continue;
        }

        let alias_candidates: Vec<String> = match office_token {
            "시장" => vec![format!("{prefix}광역시"), format!("{prefix}시"), prefix.to_string()],
            "지사" | "도지사" => vec![
                format!("{prefix}도"),
                format!("{prefix}특별자치도"),
                prefix.to_string(),
            ],
            "교육감" => vec![
                format!("{prefix}광역시"),
                format!("{prefix}특별시"),
                format!("{prefix}특별자치시"),
                format!("{prefix}도"),
                format!("{prefix}특별자치도"),
                prefix.to_string(),
            ],
            _ => vec![prefix.to_string()],
        };

        let region_code = alias_candidates.iter().find_map(|alias| {
            REGION_ALIASES
                .iter()
                .find(|(a, _)| *a == alias.as_str())
                .map(|(_, code)| (*code).to_string())
        });
        let Some(region_code) = region_code else {
            continue;
        };

        return match office_token {
            "시장" => {
                let office = if region_code.ends_with("-000") {
                    "광역자치단체장"
                } else {
                    "기초자치단체장"
                };
                Some((region_code, office))
            }
            "지사" | "도지사" => Some((
                to_sido_region_code(Some(&region_code)).unwrap_or(region_code),
                "광역자치단체장",
            )),
            "교육감" => Some((
                to_sido_region_code(Some(&region_code)).unwrap_or(region_code),
                "교육감",
            )),
            _ => None,
        };
    }
    None
}

/// Re-derive region/office/matchup from office phrasing in the survey name
/// and article title, defaulting a missing declared scope by code shape.
pub fn apply_survey_name_correction(observation: &mut PollObservation, article_title: &str) {
    let combined = format!("{} {}", observation.survey_name.trim(), article_title.trim());
    let Some((region_code, office_type)) = office_region_from_survey_name(combined.trim()) else {
        return;
    };

    observation.matchup_id = rebuild_matchup_id(&observation.matchup_id, office_type, &region_code);
    observation.office_type = office_type.to_string();
    observation.region_code = region_code.clone();

    if observation.audience_scope.is_none() {
        observation.audience_scope = Some(if region_code.ends_with("-000") {
            AudienceScope::Regional
        } else {
            AudienceScope::Local
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(json: serde_json::Value) -> PollObservation {
        let mut base = serde_json::json!({
            "observation_key": "obs-1",
            "survey_name": "여론조사",
            "pollster": "리서치뷰",
            "region_code": "11-000",
            "office_type": "광역자치단체장",
            "matchup_id": "20260603|광역자치단체장|11-000",
        });
        base.as_object_mut()
            .unwrap()
            .extend(json.as_object().unwrap().clone());
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn national_marker_resolves_national_with_high_confidence() {
        let obs = observation(serde_json::json!({
            "sampling_population_text": "전국 만 18세 이상 남녀",
        }));
        let res = resolve_observation_scope(&obs);
        assert_eq!(res.scope, Some(AudienceScope::National));
        assert_eq!(res.audience_region_code, None);
        assert_eq!(res.confidence, 0.92);
        assert!(res.hard_fail_reason.is_none());
    }

    #[test]
    fn declared_national_vs_inferred_regional_hard_fails() {
        let obs = observation(serde_json::json!({
            "audience_scope": "national",
            "sampling_population_text": "서울 거주 만 18세 이상",
        }));
        let res = resolve_observation_scope(&obs);
        let reason = res.hard_fail_reason.expect("conflict");
        assert!(reason.starts_with("AUDIENCE_SCOPE_CONFLICT_POPULATION"));
    }

    #[test]
    fn declared_region_mismatch_hard_fails_at_sido_level() {
        let obs = observation(serde_json::json!({
            "audience_scope": "regional",
            "audience_region_code": "26-000",
            "sampling_population_text": "서울특별시 거주 유권자",
        }));
        let res = resolve_observation_scope(&obs);
        let reason = res.hard_fail_reason.expect("conflict");
        assert!(reason.starts_with("AUDIENCE_SCOPE_CONFLICT_REGION"));
    }

    #[test]
    fn no_signal_falls_back_to_observation_region_shape() {
        let local = observation(serde_json::json!({ "region_code": "11-680" }));
        let res = resolve_observation_scope(&local);
        assert_eq!(res.scope, Some(AudienceScope::Local));
        assert_eq!(res.audience_region_code.as_deref(), Some("11-680"));

        let regional = observation(serde_json::json!({}));
        let res = resolve_observation_scope(&regional);
        assert_eq!(res.scope, Some(AudienceScope::Regional));
        assert_eq!(res.audience_region_code.as_deref(), Some("11-000"));
    }

    #[test]
    fn regional_scope_widens_sub_region_codes() {
        let obs = observation(serde_json::json!({
            "audience_scope": "regional",
            "audience_region_code": "11-680",
        }));
        let res = resolve_observation_scope(&obs);
        assert_eq!(res.audience_region_code.as_deref(), Some("11-000"));
    }

    #[test]
    fn tie_score_reports_low_confidence() {
        // regional hint and local hint, no alias: 1.0 vs 1.0 tie
        let obs = observation(serde_json::json!({
            "sampling_population_text": "광역 시군구 유권자",
        }));
        let res = resolve_observation_scope(&obs);
        assert_eq!(res.inferred_scope, None);
        assert_eq!(res.confidence, 0.6);
        // no inferred scope at a tie, so nothing to report as low confidence
        assert!(res.low_confidence_reason.is_none());
    }

    #[test]
    fn hardguard_pins_metro_race_and_resyncs_region() {
        let mut record: IngestRecord = serde_json::from_value(serde_json::json!({
            "article": {
                "url": "https://news.example/1",
                "title": "서울시장 가상대결 박빙",
                "publisher": "example",
            },
            "region": {
                "region_code": "11-680",
                "sido_name": "서울특별시",
                "sigungu_name": "강남구",
                "admin_level": "sigungu",
                "parent_region_code": "11-000",
            },
            "observation": {
                "observation_key": "obs-1",
                "survey_name": "강남구 정례조사",
                "pollster": "리서치뷰",
                "region_code": "11-680",
                "office_type": "기초자치단체장",
                "matchup_id": "20260603|기초자치단체장|11-680",
            },
            "options": [],
        }))
        .unwrap();

        let needle = apply_scope_hardguard(&mut record);
        assert_eq!(needle, Some("서울시장"));
        assert_eq!(record.observation.office_type, "광역자치단체장");
        assert_eq!(record.observation.region_code, "11-000");
        assert_eq!(
            record.observation.matchup_id,
            "20260603|광역자치단체장|11-000"
        );
        let region = record.region.unwrap();
        assert_eq!(region.region_code, "11-000");
        assert_eq!(region.sigungu_name, "전체");
        assert_eq!(region.admin_level, AdminLevel::Sido);
        assert_eq!(region.parent_region_code, None);
    }

    #[test]
    fn survey_name_office_phrase_rederives_matchup() {
        let mut obs = observation(serde_json::json!({
            "survey_name": "경기도지사 적합도 조사",
            "region_code": "41-110",
            "office_type": "기초자치단체장",
            "matchup_id": "20260603|기초자치단체장|41-110",
        }));
        apply_survey_name_correction(&mut obs, "");
        assert_eq!(obs.region_code, "41-000");
        assert_eq!(obs.office_type, "광역자치단체장");
        assert_eq!(obs.matchup_id, "20260603|광역자치단체장|41-000");
        assert_eq!(obs.audience_scope, Some(AudienceScope::Regional));
    }

    #[test]
    fn sub_region_mayor_phrase_maps_to_basic_office() {
        let mut obs = observation(serde_json::json!({
            "survey_name": "춘천시장 선호도",
            "matchup_id": "20260603|광역자치단체장|42-000",
        }));
        apply_survey_name_correction(&mut obs, "");
        assert_eq!(obs.region_code, "42-110");
        assert_eq!(obs.office_type, "기초자치단체장");
    }

    #[test]
    fn election_id_inference_handles_both_separators() {
        assert_eq!(infer_election_id("20260603|광역자치단체장|11-000"), "20260603");
        assert_eq!(infer_election_id("20260603:legacy"), "20260603");
        assert_eq!(infer_election_id("no-separator"), "unknown");
    }
}
