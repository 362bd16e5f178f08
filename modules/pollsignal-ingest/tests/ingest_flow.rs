//! End-to-end ingestion runs against the in-memory store.

use serde_json::json;

use pollsignal_common::types::{IngestBatch, ReviewIssue, RunStatus, SourceChannel};
use pollsignal_ingest::testutil::{MemoryStore, ScriptedRegistry};
use pollsignal_ingest::Ingestor;

fn batch(records: serde_json::Value) -> IngestBatch {
    serde_json::from_value(json!({
        "run_type": "article",
        "extractor_version": "extractor-v3",
        "records": records,
    }))
    .unwrap()
}

fn article_record() -> serde_json::Value {
    json!({
        "article": {
            "url": "https://news.example.com/poll-1",
            "title": "서울 여론 정례조사 결과",
            "publisher": "example",
            "published_at": "2026-01-10T02:00:00Z",
        },
        "observation": {
            "observation_key": "art-obs-1",
            "survey_name": "서울 지역 정례조사",
            "pollster": "리서치A",
            "sponsor": "신문B",
            "method": "ARS",
            "survey_start_date": "2026-01-05",
            "survey_end_date": "2026-01-07",
            "sample_size": 1004,
            "region_code": "11-000",
            "office_type": "광역자치단체장",
            "matchup_id": "20260603|광역자치단체장|11-000",
            "audience_scope": "regional",
            "audience_region_code": "11-000",
            "sampling_population_text": "서울특별시 거주 18세 이상",
            "poll_block_id": "block-1",
            "source_channel": "article",
        },
        "options": [
            {
                "option_type": "candidate_matchup",
                "option_name": "김철수",
                "value_raw": "48.2%",
                "value_mid": 48.2,
            },
            {
                "option_type": "candidate_matchup",
                "option_name": "이영희",
                "value_raw": "41.0%",
                "value_mid": 41.0,
            },
        ],
    })
}

#[tokio::test]
async fn repeated_ingest_is_idempotent() {
    let ingestor = Ingestor::new(MemoryStore::new());
    let b = batch(json!([article_record()]));

    let first = ingestor.ingest(&b).await.unwrap();
    assert_eq!(first.processed_count, 1);
    assert_eq!(first.error_count, 0);
    assert_eq!(first.status, RunStatus::Success);

    let second = ingestor.ingest(&b).await.unwrap();
    assert_eq!(second.processed_count, 1);

    let store = ingestor.store();
    assert_eq!(store.articles().len(), 1);
    assert_eq!(store.observations().len(), 1);
    assert_eq!(store.options_for("art-obs-1").len(), 2);
    assert_eq!(store.matchups().len(), 1);
}

#[tokio::test]
async fn declared_scope_conflicting_with_population_text_blocks_the_record() {
    let mut record = article_record();
    record["observation"]["audience_scope"] = json!("national");
    record["observation"]["audience_region_code"] = serde_json::Value::Null;
    // population text plainly says Seoul residents
    record["observation"]["sampling_population_text"] = json!("서울특별시 거주 남녀");

    let ingestor = Ingestor::new(MemoryStore::new());
    let summary = ingestor.ingest(&batch(json!([record]))).await.unwrap();

    assert_eq!(summary.processed_count, 0);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.status, RunStatus::PartialSuccess);

    let store = ingestor.store();
    assert!(store.articles().is_empty());
    assert!(store.observations().is_empty());
    let reviews = store.reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].issue_type, ReviewIssue::MappingError);
    assert!(reviews[0]
        .review_note
        .starts_with("AUDIENCE_SCOPE_CONFLICT_POPULATION"));
}

#[tokio::test]
async fn nesdc_report_merges_over_the_article_report() {
    let ingestor = Ingestor::new(MemoryStore::new());
    ingestor.ingest(&batch(json!([article_record()]))).await.unwrap();

    let mut nesdc = article_record();
    nesdc["article"]["url"] = json!("https://nesdc.example.go.kr/poll-1");
    nesdc["observation"]["observation_key"] = json!("nesdc-obs-1");
    nesdc["observation"]["source_channel"] = json!("nesdc");
    nesdc["observation"]["verified"] = json!(true);
    nesdc["observation"]["response_rate"] = json!(4.2);
    let summary = ingestor.ingest(&batch(json!([nesdc]))).await.unwrap();
    assert_eq!(summary.error_count, 0);

    let store = ingestor.store();
    // merged into the existing observation row
    assert_eq!(store.observations().len(), 1);
    let merged = store.observation_by_key("art-obs-1").unwrap();
    assert_eq!(merged.source_channel, SourceChannel::Nesdc);
    assert!(merged.verified);
    assert_eq!(merged.response_rate, Some(4.2));
    assert!(merged.source_channels.contains(&SourceChannel::Article));
    assert!(merged.source_channels.contains(&SourceChannel::Nesdc));
}

#[tokio::test]
async fn core_field_conflict_rolls_back_and_routes_to_review() {
    let ingestor = Ingestor::new(MemoryStore::new());
    ingestor.ingest(&batch(json!([article_record()]))).await.unwrap();

    // same fingerprint fields, different office: irreconcilable
    let mut conflicting = article_record();
    conflicting["observation"]["observation_key"] = json!("art-obs-2");
    conflicting["observation"]["office_type"] = json!("교육감");
    conflicting["observation"]["matchup_id"] = json!("20260603|교육감|11-000");
    let summary = ingestor.ingest(&batch(json!([conflicting]))).await.unwrap();

    assert_eq!(summary.processed_count, 0);
    assert_eq!(summary.error_count, 1);
    let store = ingestor.store();
    assert_eq!(store.rollback_count(), 1);
    assert_eq!(store.observations().len(), 1);
    assert_eq!(
        store.observation_by_key("art-obs-1").unwrap().office_type,
        "광역자치단체장"
    );
    let review = store
        .reviews()
        .into_iter()
        .find(|r| r.issue_type == ReviewIssue::DuplicateConflict)
        .expect("conflict review");
    assert!(review.review_note.contains("office_type"));
}

#[tokio::test]
async fn stale_survey_window_is_counted_as_error() {
    let mut record = article_record();
    record["observation"]["survey_start_date"] = json!("2025-10-20");
    record["observation"]["survey_end_date"] = json!("2025-10-25");

    let ingestor = Ingestor::new(MemoryStore::new());
    let summary = ingestor.ingest(&batch(json!([record]))).await.unwrap();

    assert_eq!(summary.processed_count, 0);
    assert_eq!(summary.error_count, 1);
    let reviews = ingestor.store().reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].issue_type, ReviewIssue::IngestionError);
    assert!(reviews[0].review_note.starts_with("STALE_CYCLE_BLOCK"));
}

#[tokio::test]
async fn pre_cutoff_article_is_counted_as_error() {
    let mut record = article_record();
    // 2025-11-30T23:59:59+09:00, one second before the window opens
    record["article"]["published_at"] = json!("2025-11-30T14:59:59Z");

    let ingestor = Ingestor::new(MemoryStore::new());
    let summary = ingestor.ingest(&batch(json!([record]))).await.unwrap();

    assert_eq!(summary.processed_count, 0);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.status, RunStatus::PartialSuccess);
    let store = ingestor.store();
    assert!(store.observations().is_empty());
    let reviews = store.reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].issue_type, ReviewIssue::IngestionError);
    assert!(reviews[0]
        .review_note
        .starts_with("ARTICLE_PUBLISHED_AT_CUTOFF_BLOCK"));
}

#[tokio::test]
async fn matchup_survey_text_splits_scenarios_and_leaves_no_default_rows() {
    let mut record = article_record();
    record["observation"]["survey_name"] = json!(
        "서울 지역 가상대결: 양자대결 김철수 48.2% - 이영희 41.0%, \
         김철수 47.5% - 박민수 39.8% 다자대결 김철수 38.1% 이영희 30.2% 박민수 21.4%"
    );
    record["options"] = json!([
        {"option_type": "candidate_matchup", "option_name": "김철수", "value_mid": 48.2},
        {"option_type": "candidate_matchup", "option_name": "이영희", "value_mid": 41.0},
        {"option_type": "candidate_matchup", "option_name": "김철수", "value_mid": 47.5},
        {"option_type": "candidate_matchup", "option_name": "박민수", "value_mid": 39.8},
        {"option_type": "candidate_matchup", "option_name": "김철수", "value_mid": 38.1},
        {"option_type": "candidate_matchup", "option_name": "이영희", "value_mid": 30.2},
        {"option_type": "candidate_matchup", "option_name": "박민수", "value_mid": 21.4},
    ]);

    let ingestor = Ingestor::new(MemoryStore::new());
    let summary = ingestor.ingest(&batch(json!([record]))).await.unwrap();
    assert_eq!(summary.error_count, 0);

    let options = ingestor.store().options_for("art-obs-1");
    assert_eq!(options.len(), 7);
    assert!(options.iter().all(|o| !o.is_default_scenario()));
    let keys: Vec<&str> = options.iter().map(|o| o.scenario_key.as_str()).collect();
    assert!(keys.contains(&"h2h-김철수-이영희"));
    assert!(keys.contains(&"h2h-김철수-박민수"));
    assert!(keys.contains(&"multi-김철수"));
}

#[tokio::test]
async fn split_party_context_routes_low_confidence_inference_to_review() {
    let mut record = article_record();
    record["candidates"] = json!([
        {"candidate_id": "kim-a", "name_ko": "김철수", "party_name": "더불어민주당",
         "career_summary": "전 시의원", "election_history": "2022 지방선거"},
        {"candidate_id": "kim-b", "name_ko": "김철수", "party_name": "국민의힘",
         "career_summary": "전 구청장", "election_history": "2018 지방선거"},
    ]);

    let ingestor = Ingestor::new(MemoryStore::new());
    ingestor.ingest(&batch(json!([record]))).await.unwrap();

    let store = ingestor.store();
    let review = store
        .reviews()
        .into_iter()
        .find(|r| r.issue_type == ReviewIssue::PartyInferenceLowConfidence)
        .expect("low-confidence party review");
    assert!(review
        .review_note
        .starts_with("party inference confidence below 0.8: 김철수:0.55"));

    let option = store
        .options_for("art-obs-1")
        .into_iter()
        .find(|o| o.option_name == "김철수")
        .unwrap();
    assert_eq!(option.party_inference_confidence, Some(0.55));
    assert!(option.needs_manual_review);
}

#[tokio::test]
async fn registry_backed_verification_marks_options_verified() {
    let registry = ScriptedRegistry::new()
        .with_verified("김철수", 0.98)
        .with_verified("이영희", 0.98);
    let ingestor = Ingestor::with_registry(MemoryStore::new(), registry);

    let summary = ingestor.ingest(&batch(json!([article_record()]))).await.unwrap();
    assert_eq!(summary.error_count, 0);

    let options = ingestor.store().options_for("art-obs-1");
    assert_eq!(options.len(), 2);
    for option in options {
        assert!(option.candidate_verified);
        assert_eq!(option.candidate_verify_source.as_deref(), Some("data_go"));
        assert_eq!(option.candidate_verify_confidence, Some(0.98));
    }
    // nothing needed a manual look
    assert!(ingestor
        .store()
        .reviews()
        .iter()
        .all(|r| r.issue_type != ReviewIssue::MappingError
            || !r.review_note.contains("candidate verification")));
}

#[tokio::test]
async fn unverified_candidates_are_reported_once_per_observation() {
    let ingestor = Ingestor::new(MemoryStore::new());
    ingestor.ingest(&batch(json!([article_record()]))).await.unwrap();

    let reviews = ingestor.store().reviews();
    let verify_reviews: Vec<_> = reviews
        .iter()
        .filter(|r| r.review_note.starts_with("candidate verification manual review required"))
        .collect();
    assert_eq!(verify_reviews.len(), 1);
    assert!(verify_reviews[0].review_note.contains("김철수:CANDIDATE_NOT_VERIFIED"));
    assert!(verify_reviews[0].review_note.contains("이영희:CANDIDATE_NOT_VERIFIED"));
}
