// libs/appointment-cell/src/services/mod.rs
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::models::AppointmentError;

pub mod booking;
pub mod events;
pub mod lifecycle;
pub mod memory_store;
pub mod occupancy;
pub mod store;
pub mod supabase_store;

/// Runs a storage call under a deadline. An expired deadline becomes
/// `StorageTimeout`; the dropped call has either fully written or not at all.
pub async fn bounded<T, F>(
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, AppointmentError>
where
    F: Future<Output = Result<T, AppointmentError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Storage call {} exceeded {:?}", operation, timeout);
            Err(AppointmentError::StorageTimeout {
                operation,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), _> = bounded(Duration::from_millis(10), "sleep", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(AppointmentError::StorageTimeout { operation: "sleep", timeout_ms: 10 })
        ));
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let result = bounded(Duration::from_secs(1), "noop", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
