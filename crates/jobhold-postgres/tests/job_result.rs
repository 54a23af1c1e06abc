use jobhold_core::JobResultStore;
use jobhold_postgres::PgJobResultStore;
use jobhold_testing::{init_tracing, JobFixture};
use sqlx::PgPool;

#[sqlx::test(migrations = "../../migrations")]
async fn put_then_get_round_trips_by_job_id(pool: PgPool) {
    init_tracing();
    let job_id = JobFixture::new("browser").insert(&pool).await;
    let store = PgJobResultStore::new(pool);

    store.put(job_id, "browser", serde_json::json!({"alert_id": "a1"})).await.unwrap();
    let result = store.get_by_job_id(job_id).await.unwrap();
    assert_eq!(result.job_id, Some(job_id));
    assert_eq!(result.result["alert_id"], "a1");

    let by_alert = store.get_by_alert_id("a1").await.unwrap();
    assert_eq!(by_alert.len(), 1);
    assert_eq!(by_alert[0].job_id, Some(job_id));
}

#[sqlx::test(migrations = "../../migrations")]
async fn put_rejects_job_types_outside_the_configured_set(pool: PgPool) {
    init_tracing();
    let job_id = JobFixture::new("browser").insert(&pool).await;
    let store = PgJobResultStore::new(pool).with_supported_job_types(["browser".to_string()]);

    let err = store
        .put(job_id, "email", serde_json::json!({}))
        .await
        .expect_err("email is not in the supported set");
    assert!(matches!(err, jobhold_core::StoreError::JobResultsNotConfigured));

    store.put(job_id, "browser", serde_json::json!({})).await.unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn list_by_job_type_rejects_unsupported_type(pool: PgPool) {
    init_tracing();
    let store = PgJobResultStore::new(pool).with_supported_job_types(["browser".to_string()]);

    let err = store.list_by_job_type("email").await.expect_err("email is not supported");
    assert!(matches!(err, jobhold_core::StoreError::JobResultsNotConfigured));
}
