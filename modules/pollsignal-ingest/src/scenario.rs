//! Scenario separation for candidate-matchup options.
//!
//! One article frequently reports several compositions of the same race: two
//! head-to-head pairings plus a multi-candidate field. Mixing their values
//! under one scenario makes every chart wrong, so the separator re-partitions
//! matchup options using the pairings stated in the survey text.
//!
//! Invariant: once any explicit scenario exists for an observation, no
//! default-keyed candidate row may remain.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use pollsignal_common::types::{OptionType, PollOption, ScenarioType};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[가-힣]{2,6}").unwrap());
static H2H_PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"([가-힣]{2,6})\s*([0-9]{1,2}(?:\.[0-9]+)?)\s*%?\s*[-~]\s*([가-힣]{2,6})\s*([0-9]{1,2}(?:\.[0-9]+)?)\s*%?",
    )
    .unwrap()
});
static MULTI_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"다자대결[^가-힣0-9%]*([가-힣]{2,6})\s*([0-9]{1,2}(?:\.[0-9]+)?)\s*%?").unwrap()
});
static MULTI_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([가-힣]{2,6})\s*([0-9]{1,2}(?:\.[0-9]+)?)\s*%?").unwrap());

/// Stated and option values must agree within this tolerance to match.
const VALUE_MATCH_TOLERANCE: f64 = 0.15;

const MULTI_MARKER: &str = "다자대결";
const H2H_MARKER: &str = "양자대결";
const MULTI_TITLE: &str = "다자대결";

/// First clean hangul name token in a string, or the trimmed string itself.
fn name_token(value: &str) -> String {
    let text = value.trim();
    match NAME_RE.find(text) {
        Some(m) => m.as_str().to_string(),
        None => text.to_string(),
    }
}

fn scenario_value(option: &PollOption) -> f64 {
    option.value_mid.unwrap_or(f64::NEG_INFINITY)
}

fn extract_h2h_pairs(text: &str) -> Vec<(String, f64, String, f64)> {
    let mut pairs = Vec::new();
    let mut seen: HashSet<(String, String, String, String)> = HashSet::new();
    for caps in H2H_PAIR_RE.captures_iter(text) {
        let left_name = name_token(&caps[1]);
        let right_name = name_token(&caps[3]);
        if left_name.is_empty() || right_name.is_empty() || left_name == right_name {
            continue;
        }
        let (Ok(left_value), Ok(right_value)) =
            (caps[2].parse::<f64>(), caps[4].parse::<f64>())
        else {
            continue;
        };
        let key = (
            left_name.clone(),
            caps[2].to_string(),
            right_name.clone(),
            caps[4].to_string(),
        );
        if !seen.insert(key) {
            continue;
        }
        pairs.push((left_name, left_value, right_name, right_value));
    }
    pairs
}

fn extract_multi_anchor(text: &str) -> Option<(String, f64)> {
    let caps = MULTI_ANCHOR_RE.captures(text)?;
    let name = name_token(&caps[1]);
    if name.is_empty() {
        return None;
    }
    let value = caps[2].parse::<f64>().ok()?;
    Some((name, value))
}

/// Name-value tokens following the multi-candidate marker. The parsing
/// window is cut at the next unrelated survey snippet; fewer than three
/// distinct names is not a multi composition.
fn extract_multi_candidates(text: &str) -> Vec<(String, f64)> {
    let Some(start) = text.find(MULTI_MARKER) else {
        return Vec::new();
    };
    let mut segment = &text[start..];
    for stop_token in [" 양자대결", " 가상대결", " 여론조사", "표본오차", "응답률"] {
        if let Some(idx) = segment.find(stop_token) {
            if idx > 0 {
                segment = &segment[..idx];
                break;
            }
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut rows = Vec::new();
    for caps in MULTI_ITEM_RE.captures_iter(segment) {
        let name = name_token(&caps[1]);
        if name.is_empty() || seen.contains(&name) {
            continue;
        }
        let Ok(value) = caps[2].parse::<f64>() else {
            continue;
        };
        seen.insert(name.clone());
        rows.push((name, value));
    }
    if rows.len() >= 3 {
        rows
    } else {
        Vec::new()
    }
}

struct MatchContext<'a> {
    options: &'a mut Vec<PollOption>,
    candidate_indexes: Vec<usize>,
    names_by_index: HashMap<usize, String>,
}

impl MatchContext<'_> {
    /// Best unused option for a stated name/value token, by value distance
    /// within the tolerance.
    fn match_index(&self, name: &str, value: f64, exclude: &HashSet<usize>) -> Option<usize> {
        let mut candidates: Vec<usize> = self
            .candidate_indexes
            .iter()
            .copied()
            .filter(|i| {
                !exclude.contains(i)
                    && self.names_by_index.get(i).is_some_and(|n| n == name)
                    && (scenario_value(&self.options[*i]) - value).abs() <= VALUE_MATCH_TOLERANCE
            })
            .collect();
        candidates.sort_by(|a, b| {
            let da = (scenario_value(&self.options[*a]) - value).abs();
            let db = (scenario_value(&self.options[*b]) - value).abs();
            da.total_cmp(&db)
        });
        candidates.first().copied()
    }

    /// Clone a template option for a stated token with no matching row.
    /// Generic templates (different name) reset identity and verification
    /// fields and flag the clone for review.
    fn clone_option(&mut self, name: &str, value: f64) -> Option<usize> {
        let mut template_indexes: Vec<usize> = self
            .candidate_indexes
            .iter()
            .copied()
            .filter(|i| self.names_by_index.get(i).is_some_and(|n| n == name))
            .collect();
        let generic_template = template_indexes.is_empty();
        if generic_template {
            template_indexes = vec![*self.candidate_indexes.first()?];
        }
        template_indexes.sort_by(|a, b| {
            let da = (scenario_value(&self.options[*a]) - value).abs();
            let db = (scenario_value(&self.options[*b]) - value).abs();
            da.total_cmp(&db)
        });

        let mut row = self.options[template_indexes[0]].clone();
        row.option_name = name.to_string();
        row.value_mid = Some(value);
        row.value_raw = Some(format!("{value:.1}%"));
        if generic_template {
            row.candidate_id = None;
            row.party_name = None;
            row.party_inferred = false;
            row.party_inference_source = None;
            row.party_inference_confidence = None;
            row.party_inference_evidence = None;
            row.candidate_verified = false;
            row.candidate_verify_source = Some("manual".into());
            row.candidate_verify_confidence = Some(0.0);
            row.candidate_verify_matched_key = Some(name.to_string());
            row.needs_manual_review = true;
        }
        row.scenario_key = "default".to_string();
        row.scenario_type = None;
        row.scenario_title = None;

        self.options.push(row);
        let idx = self.options.len() - 1;
        self.candidate_indexes.push(idx);
        self.names_by_index.insert(idx, name.to_string());
        Some(idx)
    }

    fn assign(&mut self, idx: usize, name: &str, value: f64, key: &str, scenario: ScenarioType, title: &str) {
        let row = &mut self.options[idx];
        row.option_name = name.to_string();
        row.value_mid = Some(value);
        row.value_raw = Some(format!("{value:.1}%"));
        row.scenario_key = key.to_string();
        row.scenario_type = Some(scenario);
        row.scenario_title = Some(title.to_string());
    }
}

fn matchup_indexes(options: &[PollOption]) -> Vec<usize> {
    options
        .iter()
        .enumerate()
        .filter(|(_, o)| o.option_type == OptionType::CandidateMatchup)
        .map(|(i, _)| i)
        .collect()
}

fn names_for(options: &[PollOption], indexes: &[usize]) -> HashMap<usize, String> {
    indexes
        .iter()
        .map(|&i| (i, name_token(&options[i].option_name)))
        .collect()
}

/// True when any matchup option already carries an explicit (non-default)
/// scenario key.
pub fn has_explicit_candidate_scenarios(options: &[PollOption]) -> bool {
    options.iter().any(|o| {
        o.option_type == OptionType::CandidateMatchup && !o.is_default_scenario()
    })
}

/// Soft review signal: the text promises a multi-candidate composition but
/// fewer than three distinct candidate names survived extraction.
pub fn detect_scenario_parse_incomplete(
    survey_name: &str,
    article_title: &str,
    article_raw_text: Option<&str>,
    options: &[PollOption],
) -> Option<(usize, Vec<String>)> {
    let text = format!(
        "{survey_name} {article_title} {}",
        article_raw_text.unwrap_or("")
    );
    if !text.contains(MULTI_MARKER) {
        return None;
    }
    let mut names: Vec<String> = options
        .iter()
        .filter(|o| o.option_type.is_candidate_like())
        .map(|o| name_token(&o.option_name))
        .filter(|n| !n.is_empty())
        .collect();
    names.sort();
    names.dedup();
    if names.len() < 3 {
        Some((names.len(), names))
    } else {
        None
    }
}

/// Fold previously persisted default-scenario rows into the current multi
/// scenario when they name candidates it lacks.
pub fn backfill_multi_from_defaults(
    options: &mut Vec<PollOption>,
    default_rows: &[PollOption],
) -> bool {
    let mut multi_key = String::new();
    let mut multi_title = MULTI_TITLE.to_string();
    let mut multi_names: HashSet<String> = HashSet::new();

    for row in options.iter_mut() {
        if row.option_type != OptionType::CandidateMatchup {
            continue;
        }
        let key = row.scenario_key.trim().to_string();
        let is_multi = row.scenario_type == Some(ScenarioType::MultiCandidate)
            || key.starts_with("multi-");
        if !is_multi {
            continue;
        }
        if multi_key.is_empty() {
            multi_key = key;
        }
        if let Some(title) = row.scenario_title.as_deref().map(str::trim) {
            if !title.is_empty() {
                multi_title = title.to_string();
            }
        }
        let name = name_token(&row.option_name);
        if !name.is_empty() {
            multi_names.insert(name.clone());
            row.option_name = name;
            row.scenario_type = Some(ScenarioType::MultiCandidate);
            row.scenario_title = Some(multi_title.clone());
        }
    }
    if multi_key.is_empty() {
        return false;
    }

    let mut changed = false;
    for default_row in default_rows {
        let name = name_token(&default_row.option_name);
        if name.is_empty() || multi_names.contains(&name) {
            continue;
        }
        let mut row = default_row.clone();
        row.option_type = OptionType::CandidateMatchup;
        row.option_name = name.clone();
        row.candidate_id = None;
        row.party_name = None;
        row.scenario_key = multi_key.clone();
        row.scenario_type = Some(ScenarioType::MultiCandidate);
        row.scenario_title = Some(multi_title.clone());
        row.party_inferred = false;
        row.party_inference_source = None;
        row.party_inference_confidence = None;
        row.party_inference_evidence = None;
        row.candidate_verified = true;
        row.candidate_verify_source = None;
        row.candidate_verify_confidence = None;
        row.candidate_verify_matched_key = None;
        row.needs_manual_review = false;
        options.push(row);
        multi_names.insert(name);
        changed = true;
    }
    changed
}

/// Re-partition matchup options into head-to-head and multi-candidate
/// scenarios based on the survey text. Returns true when anything moved.
pub fn separate_scenarios(survey_name: &str, options: &mut Vec<PollOption>) -> bool {
    let text = survey_name.to_string();
    if !text.contains(MULTI_MARKER) && !text.contains(H2H_MARKER) {
        return false;
    }

    let candidate_indexes = matchup_indexes(options);
    if candidate_indexes.len() < 3 {
        return false;
    }
    let names_by_index = names_for(options, &candidate_indexes);
    let multi_candidates = extract_multi_candidates(&text);

    let default_indexes: Vec<usize> = candidate_indexes
        .iter()
        .copied()
        .filter(|&i| options[i].is_default_scenario())
        .collect();
    let explicit_indexes: Vec<usize> = candidate_indexes
        .iter()
        .copied()
        .filter(|i| !default_indexes.contains(i))
        .collect();

    // Extractor already split everything; respect complete annotations.
    if !explicit_indexes.is_empty() && default_indexes.is_empty() {
        return false;
    }

    if !explicit_indexes.is_empty() {
        return canonicalize_partial_split(
            options,
            &names_by_index,
            &explicit_indexes,
            &default_indexes,
            &multi_candidates,
        );
    }

    let h2h_pairs = extract_h2h_pairs(&text);
    if text.contains(MULTI_MARKER) && h2h_pairs.len() >= 2 {
        let split = split_from_text(
            options,
            candidate_indexes.clone(),
            names_by_index.clone(),
            &text,
            &h2h_pairs,
            &multi_candidates,
        );
        if split {
            return true;
        }
    }

    duplicate_name_fallback(options, &candidate_indexes, &names_by_index)
}

/// Partially split payloads: explicit scenario rows exist alongside default
/// rows. Default rows fold into the multi scenario and are removed.
fn canonicalize_partial_split(
    options: &mut Vec<PollOption>,
    names_by_index: &HashMap<usize, String>,
    explicit_indexes: &[usize],
    default_indexes: &[usize],
    multi_candidates: &[(String, f64)],
) -> bool {
    let mut multi_key = String::new();
    let mut multi_title = MULTI_TITLE.to_string();
    for &idx in explicit_indexes {
        let row = &options[idx];
        let key = row.scenario_key.trim();
        if row.scenario_type == Some(ScenarioType::MultiCandidate) || key.starts_with("multi-") {
            if !key.is_empty() {
                multi_key = key.to_string();
            }
            if let Some(title) = row.scenario_title.as_deref().map(str::trim) {
                if !title.is_empty() {
                    multi_title = title.to_string();
                }
            }
            break;
        }
    }
    if multi_key.is_empty() {
        let anchor_name = explicit_indexes
            .iter()
            .find_map(|&idx| {
                let key = options[idx].scenario_key.trim();
                key.strip_prefix("h2h-")
                    .and_then(|rest| rest.split('-').find(|p| !p.is_empty()))
                    .map(str::to_string)
            })
            .or_else(|| {
                explicit_indexes
                    .iter()
                    .chain(default_indexes.iter())
                    .find_map(|idx| names_by_index.get(idx).filter(|n| !n.is_empty()).cloned())
            })
            .unwrap_or_else(|| "후보".to_string());
        multi_key = format!("multi-{anchor_name}");
    }

    // dedup default rows by name, keeping the highest value as template
    let mut default_templates: HashMap<String, PollOption> = HashMap::new();
    for &idx in default_indexes {
        let name = names_by_index
            .get(&idx)
            .cloned()
            .unwrap_or_else(|| name_token(&options[idx].option_name));
        if name.is_empty() {
            continue;
        }
        let mut row = options[idx].clone();
        row.option_name = name.clone();
        match default_templates.get(&name) {
            Some(existing) if scenario_value(existing) >= scenario_value(&row) => {}
            _ => {
                default_templates.insert(name, row);
            }
        }
    }

    let default_set: HashSet<usize> = default_indexes.iter().copied().collect();
    let removed_any = !default_set.is_empty();
    let mut kept = Vec::with_capacity(options.len());
    for (i, row) in options.drain(..).enumerate() {
        if !default_set.contains(&i) {
            kept.push(row);
        }
    }
    *options = kept;

    let indexes_after = matchup_indexes(options);
    let names_after = names_for(options, &indexes_after);
    let mut existing_multi_names: HashSet<String> = HashSet::new();
    for &idx in &indexes_after {
        if options[idx].scenario_key.trim() != multi_key {
            continue;
        }
        let row = &mut options[idx];
        row.scenario_type = Some(ScenarioType::MultiCandidate);
        row.scenario_title = Some(multi_title.clone());
        let name = name_token(&row.option_name);
        if !name.is_empty() {
            row.option_name = name.clone();
            existing_multi_names.insert(name);
        }
    }

    if !multi_candidates.is_empty() {
        let mut ctx = MatchContext {
            options: &mut *options,
            candidate_indexes: indexes_after,
            names_by_index: names_after,
        };
        let mut changed = removed_any;
        let mut selected: HashSet<usize> = HashSet::new();
        for (name, value) in multi_candidates {
            let idx = ctx
                .match_index(name, *value, &selected)
                .or_else(|| ctx.clone_option(name, *value));
            let Some(idx) = idx else { continue };
            ctx.assign(idx, name, *value, &multi_key, ScenarioType::MultiCandidate, &multi_title);
            selected.insert(idx);
            changed = true;
        }

        if !selected.is_empty() {
            // drop multi rows the stated composition does not name
            let mut idx = 0_usize;
            ctx.options.retain(|row| {
                let keep = !(row.option_type == OptionType::CandidateMatchup
                    && row.scenario_key.trim() == multi_key
                    && !selected.contains(&idx));
                idx += 1;
                keep
            });
            return changed;
        }
    }

    let mut changed = removed_any;
    let mut names: Vec<&String> = default_templates.keys().collect();
    names.sort();
    for name in names {
        if existing_multi_names.contains(name) {
            continue;
        }
        let mut row = default_templates[name].clone();
        row.scenario_key = multi_key.clone();
        row.scenario_type = Some(ScenarioType::MultiCandidate);
        row.scenario_title = Some(multi_title.clone());
        options.push(row);
        changed = true;
    }
    changed
}

/// Materialize h2h/h2h/multi scenario groups from explicit pairings in the
/// survey text, even when every source option sits under default.
fn split_from_text(
    options: &mut Vec<PollOption>,
    candidate_indexes: Vec<usize>,
    names_by_index: HashMap<usize, String>,
    text: &str,
    h2h_pairs: &[(String, f64, String, f64)],
    multi_candidates: &[(String, f64)],
) -> bool {
    let mut ctx = MatchContext {
        options,
        candidate_indexes,
        names_by_index,
    };
    let mut used: HashSet<usize> = HashSet::new();
    let mut anchor_for_multi: Option<String> = None;
    let mut assigned = false;

    for (left_name, left_value, right_name, right_value) in h2h_pairs {
        let left_idx = ctx
            .match_index(left_name, *left_value, &used)
            .or_else(|| ctx.clone_option(left_name, *left_value));
        let right_idx = ctx
            .match_index(right_name, *right_value, &used)
            .or_else(|| ctx.clone_option(right_name, *right_value));
        let (Some(left_idx), Some(right_idx)) = (left_idx, right_idx) else {
            continue;
        };
        if left_idx == right_idx {
            continue;
        }

        let key = format!("h2h-{left_name}-{right_name}");
        let title = format!("{left_name} vs {right_name}");
        ctx.assign(left_idx, left_name, *left_value, &key, ScenarioType::HeadToHead, &title);
        ctx.assign(right_idx, right_name, *right_value, &key, ScenarioType::HeadToHead, &title);
        used.insert(left_idx);
        used.insert(right_idx);
        if anchor_for_multi.is_none() {
            anchor_for_multi = Some(left_name.clone());
        }
        assigned = true;
    }

    if assigned && !multi_candidates.is_empty() {
        let anchor = anchor_for_multi
            .clone()
            .unwrap_or_else(|| multi_candidates[0].0.clone());
        let multi_key = format!("multi-{anchor}");
        let mut selected: HashSet<usize> = HashSet::new();
        for (name, value) in multi_candidates {
            let mut exclude = used.clone();
            exclude.extend(selected.iter().copied());
            let idx = ctx
                .match_index(name, *value, &exclude)
                .or_else(|| ctx.clone_option(name, *value));
            let Some(idx) = idx else { continue };
            ctx.assign(idx, name, *value, &multi_key, ScenarioType::MultiCandidate, MULTI_TITLE);
            selected.insert(idx);
        }

        if !selected.is_empty() {
            // every matchup row must now belong to a named composition
            let keep: HashSet<usize> = used.union(&selected).copied().collect();
            let mut idx = 0_usize;
            ctx.options.retain(|row| {
                let retain =
                    !(row.option_type == OptionType::CandidateMatchup && !keep.contains(&idx));
                idx += 1;
                retain
            });
            return true;
        }
    }

    // no parsable multi list; sweep leftover rows into one multi group
    let mut multi_indexes: Vec<usize> = ctx
        .candidate_indexes
        .iter()
        .copied()
        .filter(|i| !used.contains(i) && ctx.names_by_index.get(i).is_some_and(|n| !n.is_empty()))
        .collect();

    if let Some((multi_name, multi_value)) = extract_multi_anchor(text) {
        let idx = ctx
            .match_index(&multi_name, multi_value, &used)
            .or_else(|| ctx.clone_option(&multi_name, multi_value));
        if let Some(idx) = idx {
            if !multi_indexes.contains(&idx) {
                multi_indexes.push(idx);
            }
            let row = &mut ctx.options[idx];
            row.option_name = multi_name.clone();
            row.value_mid = Some(multi_value);
            row.value_raw = Some(format!("{multi_value:.1}%"));
        }
    }

    if assigned && !multi_indexes.is_empty() {
        let anchor = anchor_for_multi
            .or_else(|| ctx.names_by_index.get(&multi_indexes[0]).cloned())
            .unwrap_or_else(|| "후보".to_string());
        let multi_key = format!("multi-{anchor}");
        for idx in multi_indexes {
            let row = &mut ctx.options[idx];
            row.scenario_key = multi_key.clone();
            row.scenario_type = Some(ScenarioType::MultiCandidate);
            row.scenario_title = Some(MULTI_TITLE.to_string());
        }
        return true;
    }

    assigned
}

/// A repeated candidate name across >= 3 matchup rows plus a composition
/// marker: the highest pair becomes head-to-head, the rest multi.
fn duplicate_name_fallback(
    options: &mut [PollOption],
    candidate_indexes: &[usize],
    names_by_index: &HashMap<usize, String>,
) -> bool {
    let mut counts: HashMap<&String, usize> = HashMap::new();
    for idx in candidate_indexes {
        if let Some(name) = names_by_index.get(idx) {
            if !name.is_empty() {
                *counts.entry(name).or_insert(0) += 1;
            }
        }
    }
    let mut duplicate_names: Vec<&String> =
        counts.iter().filter(|(_, c)| **c >= 2).map(|(n, _)| *n).collect();
    if duplicate_names.is_empty() {
        return false;
    }
    duplicate_names.sort_by(|a, b| {
        let max_of = |name: &String| {
            candidate_indexes
                .iter()
                .filter(|i| names_by_index.get(i) == Some(name))
                .map(|i| scenario_value(&options[*i]))
                .fold(f64::NEG_INFINITY, f64::max)
        };
        max_of(b).total_cmp(&max_of(a))
    });
    let anchor_name = duplicate_names[0].clone();

    let mut anchor_indexes: Vec<usize> = candidate_indexes
        .iter()
        .copied()
        .filter(|i| names_by_index.get(i) == Some(&anchor_name))
        .collect();
    anchor_indexes.sort_by(|a, b| scenario_value(&options[*b]).total_cmp(&scenario_value(&options[*a])));
    let anchor_h2h_idx = anchor_indexes[0];
    let anchor_multi_idx = *anchor_indexes.last().unwrap_or(&anchor_h2h_idx);

    let mut partner_indexes: Vec<usize> = candidate_indexes
        .iter()
        .copied()
        .filter(|i| names_by_index.get(i) != Some(&anchor_name))
        .collect();
    if partner_indexes.is_empty() {
        return false;
    }
    partner_indexes.sort_by(|a, b| scenario_value(&options[*b]).total_cmp(&scenario_value(&options[*a])));
    let partner_h2h_idx = partner_indexes[0];
    let partner_name = names_by_index
        .get(&partner_h2h_idx)
        .cloned()
        .unwrap_or_else(|| "후보".to_string());

    let h2h_key = format!("h2h-{anchor_name}-{partner_name}");
    let h2h_title = format!("{anchor_name} vs {partner_name}");
    let multi_key = format!("multi-{anchor_name}");

    for idx in [anchor_h2h_idx, partner_h2h_idx] {
        let row = &mut options[idx];
        row.scenario_key = h2h_key.clone();
        row.scenario_type = Some(ScenarioType::HeadToHead);
        row.scenario_title = Some(h2h_title.clone());
    }
    for &idx in candidate_indexes {
        if idx == anchor_h2h_idx || idx == partner_h2h_idx {
            continue;
        }
        let row = &mut options[idx];
        row.scenario_key = multi_key.clone();
        row.scenario_type = Some(ScenarioType::MultiCandidate);
        row.scenario_title = Some(MULTI_TITLE.to_string());
    }
    if anchor_multi_idx != anchor_h2h_idx && anchor_multi_idx != partner_h2h_idx {
        let row = &mut options[anchor_multi_idx];
        row.scenario_key = multi_key;
        row.scenario_type = Some(ScenarioType::MultiCandidate);
        row.scenario_title = Some(MULTI_TITLE.to_string());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(name: &str, value: f64) -> PollOption {
        serde_json::from_value(serde_json::json!({
            "option_type": "candidate_matchup",
            "option_name": name,
            "scenario_key": "default",
            "value_mid": value,
        }))
        .unwrap()
    }

    fn keys(options: &[PollOption]) -> Vec<(String, String)> {
        options
            .iter()
            .map(|o| (o.option_name.clone(), o.scenario_key.clone()))
            .collect()
    }

    #[test]
    fn three_composition_text_splits_into_h2h_and_multi() {
        let survey = "서울시장 가상대결 양자대결 김철수 48.2% - 이영희 41.0%, \
                      김철수 47.5% - 박민수 39.8% 다자대결 김철수 38.1% 이영희 30.2% 박민수 21.4%";
        let mut options = vec![
            option("김철수", 48.2),
            option("이영희", 41.0),
            option("김철수", 47.5),
            option("박민수", 39.8),
            option("김철수", 38.1),
            option("이영희", 30.2),
            option("박민수", 21.4),
        ];

        assert!(separate_scenarios(survey, &mut options));

        let got = keys(&options);
        assert!(got.contains(&("김철수".into(), "h2h-김철수-이영희".into())));
        assert!(got.contains(&("이영희".into(), "h2h-김철수-이영희".into())));
        assert!(got.contains(&("김철수".into(), "h2h-김철수-박민수".into())));
        assert!(got.contains(&("박민수".into(), "h2h-김철수-박민수".into())));
        assert!(got.contains(&("김철수".into(), "multi-김철수".into())));
        assert!(got.contains(&("이영희".into(), "multi-김철수".into())));
        assert!(got.contains(&("박민수".into(), "multi-김철수".into())));
        assert!(options.iter().all(|o| !o.is_default_scenario()));
    }

    #[test]
    fn unmatched_stated_token_clones_a_flagged_row() {
        let survey = "양자대결 김철수 48.0% - 이영희 41.0%, \
                      김철수 47.5% - 박민수 39.8% 다자대결 김철수 38.0% 이영희 30.0% 정수진 20.0%";
        let mut options = vec![
            option("김철수", 48.0),
            option("이영희", 41.0),
            option("김철수", 47.5),
            option("박민수", 39.8),
            option("김철수", 38.0),
            option("이영희", 30.0),
        ];

        assert!(separate_scenarios(survey, &mut options));
        let cloned = options
            .iter()
            .find(|o| o.option_name == "정수진")
            .expect("cloned row");
        assert_eq!(cloned.scenario_key, "multi-김철수");
        assert!(cloned.needs_manual_review);
        assert_eq!(cloned.candidate_verify_confidence, Some(0.0));
    }

    #[test]
    fn no_grouping_signal_keeps_default() {
        let mut options = vec![option("김철수", 48.0), option("이영희", 41.0), option("박민수", 30.0)];
        assert!(!separate_scenarios("서울시장 지지도 조사", &mut options));
        assert!(options.iter().all(|o| o.is_default_scenario()));
    }

    #[test]
    fn duplicate_name_fallback_splits_highest_pair() {
        let survey = "양자대결과 다자대결 결과";
        let mut options = vec![
            option("김철수", 48.0),
            option("이영희", 41.0),
            option("김철수", 38.0),
            option("박민수", 21.0),
        ];
        assert!(separate_scenarios(survey, &mut options));
        let got = keys(&options);
        assert!(got.contains(&("김철수".into(), "h2h-김철수-이영희".into())));
        assert!(got.contains(&("이영희".into(), "h2h-김철수-이영희".into())));
        assert!(got.contains(&("김철수".into(), "multi-김철수".into())));
        assert!(got.contains(&("박민수".into(), "multi-김철수".into())));
    }

    #[test]
    fn reapplication_reaches_the_same_partition() {
        let survey = "양자대결 김철수 48.0% - 이영희 41.0% 다자대결 김철수 38.0% 이영희 30.0% 박민수 21.0%";
        let build = || {
            vec![
                option("김철수", 48.0),
                option("이영희", 41.0),
                option("김철수", 38.0),
                option("이영희", 30.0),
                option("박민수", 21.0),
            ]
        };
        let mut first = build();
        let mut second = build();
        separate_scenarios(survey, &mut first);
        separate_scenarios(survey, &mut second);
        let mut a = keys(&first);
        let mut b = keys(&second);
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn backfill_adds_missing_names_to_multi() {
        let mut options = vec![{
            let mut o = option("김철수", 38.0);
            o.scenario_key = "multi-김철수".into();
            o.scenario_type = Some(ScenarioType::MultiCandidate);
            o
        }];
        let defaults = vec![option("박민수", 21.0), option("김철수", 37.9)];
        assert!(backfill_multi_from_defaults(&mut options, &defaults));
        assert_eq!(options.len(), 2);
        let added = &options[1];
        assert_eq!(added.option_name, "박민수");
        assert_eq!(added.scenario_key, "multi-김철수");
        assert!(added.candidate_verified);
    }

    #[test]
    fn incomplete_multi_parse_is_detected() {
        let options = vec![option("김철수", 38.0), option("이영희", 30.0)];
        let got = detect_scenario_parse_incomplete("다자대결 여론조사", "", None, &options);
        assert_eq!(got, Some((2, vec!["김철수".into(), "이영희".into()])));

        let options3 = vec![option("김철수", 38.0), option("이영희", 30.0), option("박민수", 21.0)];
        assert_eq!(
            detect_scenario_parse_incomplete("다자대결 여론조사", "", None, &options3),
            None
        );
    }
}
