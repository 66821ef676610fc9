use chrono::{TimeZone, Utc};
use jobtrack_adapters::{
    source_for_adapter, validate_record, CandidateSource, CompanyConfig, FetchContext,
    FIXTURE_ADAPTER,
};
use uuid::Uuid;

fn workspace_fixtures() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

#[tokio::test]
async fn bundled_fixture_feeds_parse_and_validate() {
    let ctx = FetchContext {
        run_id: Uuid::nil(),
        fetched_at: Utc.with_ymd_and_hms(2026, 6, 1, 6, 0, 0).single().expect("ts"),
    };
    let source = source_for_adapter(FIXTURE_ADAPTER, &workspace_fixtures()).expect("fixture adapter");

    for (id, name) in [("acme", "Acme Corporation"), ("globex", "Globex")] {
        let company = CompanyConfig {
            id: id.into(),
            name: name.into(),
            adapter: FIXTURE_ADAPTER.into(),
            enabled: true,
            sources: vec![],
        };
        let records = source.fetch_candidates(&ctx, &company).await.expect("fetch");
        assert!(!records.is_empty(), "{id} feed should carry postings");
        for record in &records {
            validate_record(record, &company).expect("bundled postings are valid");
            assert_eq!(record.fetched_at, ctx.fetched_at);
        }
    }
}
