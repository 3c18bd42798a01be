//! Transactional executor.
//!
//! Runs a unit of work inside one database transaction: commit on `Ok`,
//! rollback on `Err`, and rollback on panic with the panic turned into an
//! Operational error.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use service_core::error::{AppError, ErrorDomain, ErrorKind};
use sqlx::{PgConnection, PgPool};
use tracing::{error, instrument, warn};

/// Run `work` in a transaction on `pool`.
///
/// `work` receives the transaction's connection and must not hold it beyond
/// the returned future. Owned arguments should be moved into the closure.
#[instrument(skip(pool, work))]
pub async fn run_in_transaction<T, F>(pool: &PgPool, name: &str, work: F) -> Result<T, AppError>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, AppError>> + Send,
{
    let mut tx = pool.begin().await.map_err(|e| {
        AppError::data_access(ErrorKind::Operational, "Failed to begin transaction").with_cause(e)
    })?;

    let outcome = AssertUnwindSafe(async { work(&mut *tx).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(value)) => {
            tx.commit().await.map_err(|e| {
                AppError::data_access(ErrorKind::Operational, "Failed to commit transaction")
                    .with_cause(e)
            })?;
            Ok(value)
        }
        Ok(Err(err)) => {
            if let Err(e) = tx.rollback().await {
                warn!(transaction = name, error = %e, "Rollback failed");
            }
            Err(err)
        }
        Err(payload) => {
            if let Err(e) = tx.rollback().await {
                warn!(transaction = name, error = %e, "Rollback after panic failed");
            }
            Err(panic_to_error(name, payload))
        }
    }
}

/// Convert a caught panic payload into an Operational error.
pub fn panic_to_error(name: &str, payload: Box<dyn Any + Send>) -> AppError {
    let reason = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    };

    error!(transaction = name, reason = %reason, "Recovered from panic inside transaction");

    AppError::new(
        ErrorDomain::DataAccess,
        ErrorKind::Operational,
        format!("Transaction {} failed", name),
    )
    .with_cause(anyhow::anyhow!("panic: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payloads() {
        let err = panic_to_error("create_user", Box::new("boom"));
        assert_eq!(err.kind(), ErrorKind::Operational);
        assert_eq!(err.message(), "Transaction create_user failed");
        assert_eq!(err.cause_message().as_deref(), Some("panic: boom"));

        let err = panic_to_error("delete_role", Box::new(String::from("index out of bounds")));
        assert_eq!(
            err.cause_message().as_deref(),
            Some("panic: index out of bounds")
        );

        let err = panic_to_error("purge", Box::new(42_u8));
        assert_eq!(err.cause_message().as_deref(), Some("panic: unknown panic"));
    }

    #[tokio::test]
    async fn test_catch_unwind_recovers_async_panic() {
        let outcome = AssertUnwindSafe(async {
            if true {
                panic!("inside work");
            }
            1
        })
        .catch_unwind()
        .await;

        let err = panic_to_error("work", outcome.unwrap_err());
        assert!(err.to_string().contains("panic: inside work"));
    }
}
