//! Text and value normalization shared across the ingestion engine.
//!
//! Everything here is pure: the fingerprint, scope resolver, and option
//! normalization all depend on these helpers producing identical output for
//! equivalent inputs.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Lower-case and collapse internal whitespace to single spaces.
pub fn normalize_text(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove all whitespace.
pub fn compact_text(value: &str) -> String {
    value.split_whitespace().collect()
}

/// Candidate-name token key: lower-cased with whitespace and punctuation
/// stripped, keeping only hangul and alphanumerics.
pub fn normalize_candidate_token(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || ('가'..='힣').contains(c))
        .collect()
}

/// Trim a party name, mapping empty to `None`.
pub fn normalize_party_name(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// --- Percentage values ---

static SINGLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*%?\s*$").unwrap());
static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*[~\-]\s*(\d+(?:\.\d+)?)\s*%?\s*$").unwrap());
static BAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*%?\s*대\s*$").unwrap());

const MISSING_TOKENS: [&str; 4] = ["언급 없음", "미공개", "N/A", "-"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedValue {
    pub value_min: Option<f64>,
    pub value_max: Option<f64>,
    pub value_mid: Option<f64>,
    pub is_missing: bool,
}

impl NormalizedValue {
    fn missing() -> Self {
        Self {
            value_min: None,
            value_max: None,
            value_mid: None,
            is_missing: true,
        }
    }

    fn range(lo: f64, hi: f64) -> Self {
        Self {
            value_min: Some(lo),
            value_max: Some(hi),
            value_mid: Some((lo + hi) / 2.0),
            is_missing: false,
        }
    }
}

/// Parse a raw percentage string into min/max/mid. Handles single values
/// ("43%"), ranges ("40~45"), and decade bands ("40%대" → 40..49).
pub fn normalize_percentage(raw: Option<&str>) -> NormalizedValue {
    let raw = match raw {
        Some(r) => r.trim(),
        None => return NormalizedValue::missing(),
    };
    if raw.is_empty() || MISSING_TOKENS.contains(&raw) {
        return NormalizedValue::missing();
    }

    if let Some(caps) = RANGE_RE.captures(raw) {
        let a: f64 = caps[1].parse().unwrap_or(0.0);
        let b: f64 = caps[2].parse().unwrap_or(0.0);
        return NormalizedValue::range(a.min(b), a.max(b));
    }
    if let Some(caps) = BAND_RE.captures(raw) {
        let base: f64 = caps[1].parse().unwrap_or(0.0);
        return NormalizedValue::range(base, base + 9.0);
    }
    if let Some(caps) = SINGLE_RE.captures(raw) {
        let v: f64 = caps[1].parse().unwrap_or(0.0);
        return NormalizedValue::range(v, v);
    }

    NormalizedValue::missing()
}

// --- Region codes ---

/// Legacy sido prefix aliases (강원도 32 → 강원특별자치도 42).
const LEGACY_REGION_PREFIX_MAP: [(&str, &str); 1] = [("32", "42")];

static SIMPLE_REGION_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}(?:-\d{3})?$").unwrap());
static COMPACT_REGION_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{5}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCodeNormalization {
    pub raw: String,
    pub canonical: Option<String>,
    pub was_aliased: bool,
}

fn apply_legacy_prefix_alias(code: &str) -> String {
    let prefix = &code[..2];
    for (from, to) in LEGACY_REGION_PREFIX_MAP {
        if prefix == from {
            return format!("{to}{}", &code[2..]);
        }
    }
    code.to_string()
}

fn strip_country_prefix(value: &str) -> &str {
    value
        .strip_prefix("KR-")
        .or_else(|| value.strip_prefix("KR"))
        .unwrap_or(value)
}

/// Canonicalize a region code to the `SS-NNN` shape, applying legacy prefix
/// aliases. Returns `canonical: None` for values that are not code-like.
pub fn normalize_region_code_input(raw_value: &str) -> RegionCodeNormalization {
    let raw = raw_value.trim().to_string();
    if raw.is_empty() {
        return RegionCodeNormalization {
            raw,
            canonical: None,
            was_aliased: false,
        };
    }

    let token = raw.replace(' ', "").replace('_', "-").to_uppercase();
    let stripped = strip_country_prefix(&token);

    let canonical = if SIMPLE_REGION_CODE_RE.is_match(stripped) {
        let digits: String = stripped.chars().filter(|c| c.is_ascii_digit()).collect();
        match digits.len() {
            2 => Some(apply_legacy_prefix_alias(&format!("{digits}-000"))),
            5 => Some(apply_legacy_prefix_alias(&format!(
                "{}-{}",
                &digits[..2],
                &digits[2..]
            ))),
            _ => None,
        }
    } else if COMPACT_REGION_CODE_RE.is_match(stripped) {
        Some(apply_legacy_prefix_alias(&format!(
            "{}-{}",
            &stripped[..2],
            &stripped[2..]
        )))
    } else {
        None
    };

    let was_aliased = canonical
        .as_deref()
        .map(|c| c != stripped)
        .unwrap_or(false);
    RegionCodeNormalization {
        raw,
        canonical,
        was_aliased,
    }
}

/// Best-effort region code cleanup: canonical shape when code-like, the
/// trimmed raw string otherwise, `None` when empty.
pub fn clean_region_code(value: Option<&str>) -> Option<String> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    let normalized = normalize_region_code_input(raw);
    Some(normalized.canonical.unwrap_or_else(|| raw.to_string()))
}

/// Widen any region code to its province/metro (`SS-000`) ancestor.
pub fn to_sido_region_code(value: Option<&str>) -> Option<String> {
    let code = clean_region_code(value)?;
    if code.len() >= 2 {
        Some(format!("{}-000", &code[..2]))
    } else {
        Some(code)
    }
}

/// True for province/metro-level codes (`SS-000`).
pub fn is_sido_code(code: &str) -> bool {
    code.ends_with("-000")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_case_and_whitespace() {
        assert_eq!(normalize_text("  한국  갤럽 \t Research "), "한국 갤럽 research");
    }

    #[test]
    fn percentage_single_value() {
        let v = normalize_percentage(Some("43.5%"));
        assert_eq!(v.value_mid, Some(43.5));
        assert_eq!(v.value_min, Some(43.5));
        assert!(!v.is_missing);
    }

    #[test]
    fn percentage_range_orders_bounds() {
        let v = normalize_percentage(Some("45~40"));
        assert_eq!(v.value_min, Some(40.0));
        assert_eq!(v.value_max, Some(45.0));
        assert_eq!(v.value_mid, Some(42.5));
    }

    #[test]
    fn percentage_band_spans_a_decade() {
        let v = normalize_percentage(Some("40%대"));
        assert_eq!(v.value_min, Some(40.0));
        assert_eq!(v.value_max, Some(49.0));
    }

    #[test]
    fn percentage_missing_tokens() {
        assert!(normalize_percentage(None).is_missing);
        assert!(normalize_percentage(Some("미공개")).is_missing);
        assert!(normalize_percentage(Some("-")).is_missing);
        assert!(normalize_percentage(Some("오차범위")).is_missing);
    }

    #[test]
    fn region_code_shapes_canonicalize() {
        assert_eq!(
            normalize_region_code_input("11680").canonical.as_deref(),
            Some("11-680")
        );
        assert_eq!(
            normalize_region_code_input("KR-11").canonical.as_deref(),
            Some("11-000")
        );
        assert_eq!(
            normalize_region_code_input("11_680").canonical.as_deref(),
            Some("11-680")
        );
        assert_eq!(normalize_region_code_input("서울").canonical, None);
    }

    #[test]
    fn legacy_gangwon_prefix_is_aliased() {
        assert_eq!(
            normalize_region_code_input("32-000").canonical.as_deref(),
            Some("42-000")
        );
        assert!(normalize_region_code_input("32-000").was_aliased);
    }

    #[test]
    fn sido_widening() {
        assert_eq!(to_sido_region_code(Some("11-680")).as_deref(), Some("11-000"));
        assert!(is_sido_code("26-000"));
        assert!(!is_sido_code("26-710"));
    }

    #[test]
    fn candidate_token_strips_punctuation() {
        assert_eq!(normalize_candidate_token(" 김 철수 "), "김철수");
        assert_eq!(normalize_candidate_token("Kim C-S."), "kimcs");
    }
}
