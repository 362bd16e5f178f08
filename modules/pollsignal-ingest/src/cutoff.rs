//! Fixed cutoff policy for the 2026 local-election cycle.
//!
//! Two gates run before anything is persisted: article-only records published
//! before the collection window opened, and surveys whose field window ended
//! before the cycle started. Both cutoffs are fixed instants, not config.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use std::sync::LazyLock;

use pollsignal_common::types::{PollObservation, SourceChannel};

/// 2025-12-01T00:00:00+09:00 (KST).
pub static ARTICLE_PUBLISHED_AT_CUTOFF: LazyLock<DateTime<FixedOffset>> = LazyLock::new(|| {
    kst()
        .with_ymd_and_hms(2025, 12, 1, 0, 0, 0)
        .single()
        .expect("valid article cutoff instant")
});

/// Surveys that ended before this date belong to a previous cycle.
pub static SURVEY_END_DATE_CUTOFF: LazyLock<NaiveDate> =
    LazyLock::new(|| NaiveDate::from_ymd_opt(2025, 11, 1).expect("valid survey cutoff date"));

fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("valid KST offset")
}

/// True when the article channel contributes to this observation.
pub fn has_article_source(observation: &PollObservation) -> bool {
    observation
        .effective_channels()
        .contains(&SourceChannel::Article)
}

/// `Some(reason)` when the article predates the collection window.
pub fn published_at_cutoff_reason(published_at: Option<DateTime<Utc>>) -> Option<&'static str> {
    let published_at = published_at?;
    if published_at < *ARTICLE_PUBLISHED_AT_CUTOFF {
        Some("PUBLISHED_AT_BEFORE_CUTOFF")
    } else {
        None
    }
}

/// `Some(reason)` when the survey window ended before the cycle cutoff.
pub fn survey_end_cutoff_reason(survey_end_date: Option<NaiveDate>) -> Option<&'static str> {
    let end = survey_end_date?;
    if end < *SURVEY_END_DATE_CUTOFF {
        Some("SURVEY_END_BEFORE_CUTOFF")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn one_second_before_cutoff_is_blocked() {
        // 2025-11-30T23:59:59+09:00
        assert_eq!(
            published_at_cutoff_reason(Some(utc("2025-11-30T14:59:59Z"))),
            Some("PUBLISHED_AT_BEFORE_CUTOFF")
        );
        // exactly the cutoff instant passes
        assert_eq!(published_at_cutoff_reason(Some(utc("2025-11-30T15:00:00Z"))), None);
    }

    #[test]
    fn missing_published_at_passes() {
        assert_eq!(published_at_cutoff_reason(None), None);
    }

    #[test]
    fn stale_survey_window_is_blocked() {
        assert_eq!(
            survey_end_cutoff_reason(NaiveDate::from_ymd_opt(2025, 10, 31)),
            Some("SURVEY_END_BEFORE_CUTOFF")
        );
        assert_eq!(survey_end_cutoff_reason(NaiveDate::from_ymd_opt(2025, 11, 1)), None);
        assert_eq!(survey_end_cutoff_reason(None), None);
    }

    #[test]
    fn nesdc_only_observation_has_no_article_source() {
        let obs: PollObservation = serde_json::from_value(serde_json::json!({
            "observation_key": "obs-1",
            "survey_name": "s",
            "pollster": "p",
            "region_code": "11-000",
            "office_type": "광역자치단체장",
            "matchup_id": "20260603|광역자치단체장|11-000",
            "source_channel": "nesdc",
        }))
        .unwrap();
        assert!(!has_article_source(&obs));
    }
}
