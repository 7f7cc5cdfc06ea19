use std::future::Future;
use std::time::Duration;

/// Spawns a background task on the ambient tokio runtime.
///
/// Outside of a runtime the future is driven on a dedicated thread, so resumable
/// uploads keep making progress from synchronous call sites.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use tokio::runtime::{Builder, Handle};

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
        return;
    }

    std::thread::spawn(move || match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(future),
        Err(err) => log::warn!("failed to build background tokio runtime: {err}"),
    });
}

/// Waits for `duration`, returning immediately for zero delays.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn spawned_future_runs_on_current_runtime() {
        let flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let task_flag = flag.clone();
        spawn_detached(async move {
            task_flag.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn zero_sleep_returns_immediately() {
        sleep(Duration::ZERO).await;
    }
}
