use std::sync::Arc;

use chrono::Duration;
use jobhold_core::{JobQueue, JobType, NewJob, SystemClock};
use jobhold_postgres::PgJobStore;
use jobhold_testing::{init_tracing, spawn_concurrent, JobFixture};
use sqlx::PgPool;

fn browser() -> JobType {
    JobType::new("browser").unwrap()
}

#[sqlx::test(migrations = "../../migrations")]
async fn reserve_next_orders_by_priority_then_fifo(pool: PgPool) {
    init_tracing();
    JobFixture::new("browser").with_priority(0).insert(&pool).await;
    let high_priority = JobFixture::new("browser").with_priority(10).insert(&pool).await;
    JobFixture::new("browser").with_priority(0).insert(&pool).await;

    let store = PgJobStore::new(pool, Arc::new(SystemClock));
    let reserved = store.reserve_next(&browser(), Duration::seconds(30)).await.unwrap();
    assert_eq!(reserved.id, high_priority);
}

#[sqlx::test(migrations = "../../migrations")]
async fn reserve_next_requeues_expired_leases_before_reserving(pool: PgPool) {
    init_tracing();
    let expired = JobFixture::new("browser")
        .with_status("running")
        .with_lease_expires_at(chrono::Utc::now() - Duration::minutes(5))
        .insert(&pool)
        .await;

    let store = PgJobStore::new(pool, Arc::new(SystemClock));
    let reserved = store.reserve_next(&browser(), Duration::seconds(30)).await.unwrap();
    assert_eq!(reserved.id, expired);
}

#[sqlx::test(migrations = "../../migrations")]
async fn fail_schedules_retry_with_delay_then_exhausts(pool: PgPool) {
    init_tracing();
    let store = PgJobStore::new(pool.clone(), Arc::new(SystemClock)).with_retry_delay(Duration::seconds(30));
    let mut req = NewJob::new(browser(), serde_json::json!({}));
    req.max_retries = Some(2);
    let job = store.create(req).await.unwrap();

    let reserved = store.reserve_next(&browser(), Duration::seconds(30)).await.unwrap();
    assert_eq!(reserved.id, job.id);

    store.fail(job.id, "boom").await.unwrap();

    let (status, retry_count): (String, i32) =
        sqlx::query_as("SELECT status, retry_count FROM jobs WHERE id = $1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "pending");
    assert_eq!(retry_count, 1);

    // Second reservation only succeeds once scheduled_at has elapsed; for
    // this deterministic test we just fail it again and expect exhaustion.
    sqlx::query("UPDATE jobs SET scheduled_at = now() WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();
    let reserved_again = store.reserve_next(&browser(), Duration::seconds(30)).await.unwrap();
    assert_eq!(reserved_again.id, job.id);
    store.fail(job.id, "boom again").await.unwrap();

    let (status, last_error): (String, Option<String>) =
        sqlx::query_as("SELECT status, last_error FROM jobs WHERE id = $1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "failed");
    assert_eq!(last_error.as_deref(), Some("boom again"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn concurrent_reserve_next_never_double_assigns_one_row(pool: PgPool) {
    init_tracing();
    JobFixture::new("browser").insert(&pool).await;
    let store = Arc::new(PgJobStore::new(pool, Arc::new(SystemClock)));

    let results = spawn_concurrent(8, move || {
        let store = store.clone();
        async move { store.reserve_next(&browser(), Duration::seconds(30)).await }
    })
    .await;

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1, "exactly one worker should win the single pending row");
}
