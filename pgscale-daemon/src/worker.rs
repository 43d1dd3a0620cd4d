//! Background worker registration.
//!
//! The bridge runs as a supervised background task owned by the host
//! process. A [`WorkerConfig`] describes the task (name and restart policy)
//! and is handed by value to [`register`]; there is no process-wide worker
//! registry.

use anyhow::Result;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What to do when the worker's main function fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Leave the worker stopped.
    Never,
    /// Start the main function again after `delay`.
    OnFailure { delay: Duration },
}

/// Restart policy as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartKind {
    #[default]
    Never,
    OnFailure,
}

/// Description of a background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub name: String,
    pub restart: RestartPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "pgscale_http_worker".to_string(),
            restart: RestartPolicy::Never,
        }
    }
}

/// Receiving side of a worker's shutdown request.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or the handle is dropped.
    pub async fn requested(mut self) {
        let _ = self.rx.wait_for(|requested| *requested).await;
    }
}

/// Handle to a registered worker.
pub struct WorkerHandle {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the worker to stop. Its main function observes this through the
    /// [`Shutdown`] it was started with.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the worker to stop for good.
    pub async fn join(&mut self) -> Result<()> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("worker {} panicked: {}", self.name, e)),
        }
    }
}

/// Register and start a background worker.
///
/// `main` is called once per (re)start with a fresh view of the shutdown
/// signal. It should run until shutdown is requested; returning `Ok` stops
/// the worker, returning `Err` stops or restarts it per the restart policy.
pub fn register<F, Fut>(config: WorkerConfig, main: F) -> WorkerHandle
where
    F: Fn(Shutdown) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let name = config.name.clone();

    let task = tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            info!(worker = %config.name, attempt, "Starting background worker");

            let shutdown = Shutdown {
                rx: shutdown_rx.clone(),
            };
            let err = match main(shutdown.clone()).await {
                Ok(()) => {
                    info!(worker = %config.name, "Background worker stopped");
                    return Ok(());
                }
                Err(e) => e,
            };

            match config.restart {
                RestartPolicy::OnFailure { delay } if !shutdown.is_requested() => {
                    error!(worker = %config.name, "Background worker failed: {:#}", err);
                    warn!(worker = %config.name, "Restarting in {:?}", delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.requested() => return Ok(()),
                    }
                }
                _ => {
                    error!(worker = %config.name, "Background worker exited: {:#}", err);
                    return Err(err);
                }
            }
        }
    });

    WorkerHandle {
        name,
        shutdown_tx,
        task,
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let mut handle = register(WorkerConfig::default(), |shutdown: Shutdown| async move {
            shutdown.requested().await;
            Ok(())
        });
        assert_eq!(handle.name(), "pgscale_http_worker");

        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_never_restart_reports_failure() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&starts);
        let mut handle = register(WorkerConfig::default(), move |_shutdown: Shutdown| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("can't bind"))
            }
        });

        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("can't bind"));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_on_failure() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&starts);
        let config = WorkerConfig {
            name: "flaky".to_string(),
            restart: RestartPolicy::OnFailure {
                delay: Duration::from_millis(5),
            },
        };
        let mut handle = register(config, move |_shutdown: Shutdown| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("engine busy"))
                } else {
                    Ok(())
                }
            }
        });

        handle.join().await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_during_restart_delay() {
        let config = WorkerConfig {
            name: "slow-restart".to_string(),
            restart: RestartPolicy::OnFailure {
                delay: Duration::from_secs(60),
            },
        };
        let mut handle = register(config, |_shutdown: Shutdown| async {
            Err(anyhow::anyhow!("always failing"))
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown();
        handle.join().await.unwrap();
    }
}
