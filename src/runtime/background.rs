use anyhow::Result;
use tokio::task::JoinHandle;

/// Runs `job` on the blocking pool without waiting for it. A failure is logged
/// under `label` and otherwise dropped.
///
/// The returned handle may be ignored; tests use it to wait for completion.
pub fn spawn_detached<F>(label: &'static str, job: F) -> JoinHandle<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        if let Err(e) = job() {
            tracing::warn!(task = label, error = %format!("{e:#}"), "background write failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn runs_job_and_swallows_errors() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        spawn_detached("ok", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert!(ran.load(Ordering::SeqCst));

        spawn_detached("fails", || Err(anyhow::anyhow!("disk full"))).await.unwrap();
    }
}
