use jobhold_core::{EventListOptions, EventStore, NewEvent};
use jobhold_postgres::PgEventStore;
use jobhold_testing::{init_tracing, JobFixture};
use sqlx::PgPool;
use uuid::Uuid;

fn new_event(source_job_id: Uuid, event_type: &str) -> NewEvent {
    NewEvent {
        session_id: Uuid::new_v4(),
        source_job_id: Some(source_job_id),
        event_type: event_type.to_string(),
        event_data: serde_json::json!({}),
        metadata: None,
        storage_key: None,
        priority: None,
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn keyset_pagination_visits_every_row_exactly_once(pool: PgPool) {
    init_tracing();
    let job_id = JobFixture::new("browser").insert(&pool).await;
    let store = PgEventStore::new(pool.clone());

    let rows: Vec<NewEvent> = (0..23).map(|i| new_event(job_id, &format!("evt.{i}"))).collect();
    store.bulk_insert(rows, false).await.unwrap();

    let mut seen = std::collections::HashSet::new();
    let mut cursor = None;
    loop {
        let mut opts = EventListOptions::new();
        opts.source_job_id = Some(job_id);
        opts.limit = 7;
        opts.cursor_after = cursor.clone();
        let page = store.list_by_job(opts).await.unwrap();
        if page.events.is_empty() {
            break;
        }
        for event in &page.events {
            assert!(seen.insert(event.id), "cursor pagination must not repeat a row");
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen.len(), 23);
}

#[sqlx::test(migrations = "../../migrations")]
async fn uncursored_first_page_bootstraps_forward_and_backward_cursors(pool: PgPool) {
    init_tracing();
    let job_id = JobFixture::new("browser").insert(&pool).await;
    let store = PgEventStore::new(pool.clone());

    let mut rows = Vec::new();
    for i in 0..5 {
        rows.push(new_event(job_id, "alpha.event"));
        if i < 2 {
            rows.push(new_event(job_id, "other.event"));
        }
    }
    store.bulk_insert(rows, false).await.unwrap();

    let base = || {
        let mut opts = EventListOptions::new();
        opts.source_job_id = Some(job_id);
        opts.event_type = Some("alpha.event".to_string());
        opts.limit = 2;
        opts
    };

    // The very first request carries no cursor at all, yet must still hand
    // back a usable `next_cursor` so a caller can switch onto keyset paging
    // without ever issuing a second OFFSET-based request.
    let page1 = store.list_by_job(base()).await.unwrap();
    assert_eq!(page1.events.len(), 2);
    assert!(page1.next_cursor.is_some());
    assert!(page1.prev_cursor.is_none());

    let mut opts2 = base();
    opts2.cursor_after = page1.next_cursor.clone();
    let page2 = store.list_by_job(opts2).await.unwrap();
    assert_eq!(page2.events.len(), 2);
    assert!(page2.prev_cursor.is_some());

    let mut opts3 = base();
    opts3.cursor_before = page2.prev_cursor.clone();
    let page0 = store.list_by_job(opts3).await.unwrap();
    assert_eq!(
        page0.events.iter().map(|e| e.id).collect::<Vec<_>>(),
        page1.events.iter().map(|e| e.id).collect::<Vec<_>>(),
        "paging back from page2 must return the original first page"
    );
    assert!(page0.prev_cursor.is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn bulk_insert_rolls_back_entirely_on_check_violation(pool: PgPool) {
    init_tracing();
    let job_id = JobFixture::new("browser").insert(&pool).await;
    let store = PgEventStore::new(pool.clone());

    let mut rows = vec![new_event(job_id, "page.load")];
    rows[0].priority = Some(200); // violates `priority BETWEEN 0 AND 100`
    let result = store.bulk_insert(rows, false).await;
    assert!(result.is_err());

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM events WHERE source_job_id = $1")
        .bind(job_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0, "a rejected batch must not leave partial rows behind");
}

#[sqlx::test(migrations = "../../migrations")]
async fn bulk_insert_bumps_job_meta_event_count_once_per_batch(pool: PgPool) {
    init_tracing();
    let job_id = JobFixture::new("browser").insert(&pool).await;
    let store = PgEventStore::new(pool.clone());

    store
        .bulk_insert(vec![new_event(job_id, "a"), new_event(job_id, "b")], false)
        .await
        .unwrap();
    store.bulk_insert(vec![new_event(job_id, "c")], false).await.unwrap();

    let (event_count,): (i64,) = sqlx::query_as("SELECT event_count FROM job_meta WHERE job_id = $1")
        .bind(job_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(event_count, 3);

    let mut opts = EventListOptions::new();
    opts.source_job_id = Some(job_id);
    let page = store.list_by_job(opts).await.unwrap();
    assert_eq!(page.total, Some(3));
}
