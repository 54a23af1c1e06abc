//! `pg_notify`/`LISTEN`/`UNLISTEN` plumbing.
//!
//! Channel names are always built through [`channel_name`] and always quoted
//! before being spliced into `LISTEN`/`UNLISTEN`/`NOTIFY` statements — this is
//! the one place job-type strings reach raw SQL outside a bound parameter.

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use jobhold_core::{JobType, StoreError};

/// Channel name a job type's reservation wakeups are published on.
pub fn channel_name(job_type: &JobType) -> String {
    format!("job_added_{}", job_type.as_str())
}

/// Block until a notification arrives on `job_added_<type>` or `cancel` is
/// triggered. Uses a dedicated connection via [`PgListener`], torn down
/// (UNLISTEN, connection returned) on every exit path including cancellation.
pub async fn wait_for_notification(
    pool: &PgPool,
    job_type: &JobType,
    cancel: CancellationToken,
) -> Result<(), StoreError> {
    let channel = channel_name(job_type);
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(&channel).await?;

    tokio::select! {
        notified = listener.recv() => {
            notified?;
        }
        _ = cancel.cancelled() => {}
    }

    // `PgListener::drop` issues UNLISTEN and releases the connection; an
    // explicit call here just makes the intent visible at the call site.
    listener.unlisten(&channel).await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_is_prefixed_and_lowercase() {
        let ty = JobType::new("browser").unwrap();
        assert_eq!(channel_name(&ty), "job_added_browser");
    }
}
