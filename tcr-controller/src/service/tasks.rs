//! Periodic task plumbing
//!
//! Every background loop runs each tick in its own task, so a panic in one
//! tick is logged and the loop carries on with the next one. Loops stop when
//! the shutdown token is cancelled, after the tick in progress finishes.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run `fut` in its own task, turning a panic into `None`
pub async fn guarded<F, T>(name: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(value) => Some(value),
        Err(err) if err.is_panic() => {
            tracing::error!("{} tick panicked: {}", name, err);
            None
        }
        Err(err) => {
            tracing::warn!("{} tick cancelled: {}", name, err);
            None
        }
    }
}

/// Call `tick` every `period` until `shutdown` is cancelled
pub async fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Starting {} (interval: {:?})", name, period);

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        guarded(name, tick()).await;
    }

    tracing::info!("{} stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_guarded_catches_panic() {
        let result = guarded::<_, ()>("test", async { panic!("boom") }).await;
        assert!(result.is_none());

        assert_eq!(guarded("test", async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn test_run_every_survives_panicking_tick_and_stops() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let loop_ticks = Arc::clone(&ticks);
        let handle = tokio::spawn(run_every(
            "test-loop",
            Duration::from_millis(5),
            shutdown.clone(),
            move || {
                let ticks = Arc::clone(&loop_ticks);
                async move {
                    if ticks.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first tick fails");
                    }
                }
            },
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            while ticks.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop kept ticking after a panic");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stopped on shutdown")
            .unwrap();
    }
}
