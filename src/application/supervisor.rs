//! Supervisor - keeps the bus's background loops running.
//!
//! Each task is started from a factory so it can be restarted. A task that
//! returns `Err` or panics is logged and restarted after a backoff, up to a
//! restart ceiling. Shutdown is broadcast over a `watch` channel; tasks are
//! expected to finish in-flight work and return `Ok`.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::BusConfig;
use crate::domain::foundation::DomainError;

pub type TaskFuture = BoxFuture<'static, Result<(), DomainError>>;

/// Produces a fresh run of a supervised task.
pub type TaskFactory = Arc<dyn Fn(watch::Receiver<bool>) -> TaskFuture + Send + Sync>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("task '{name}' gave up after {restarts} restarts: {last_error}")]
    RestartsExhausted {
        name: String,
        restarts: u32,
        last_error: String,
    },

    #[error("supervision of task '{0}' was aborted")]
    Aborted(String),
}

/// How a supervised task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    pub name: String,
    pub restarts: u32,
    pub result: Result<(), SupervisorError>,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub max_restarts: u32,
    pub backoff: Duration,
}

impl SupervisorConfig {
    pub fn from_bus(config: &BusConfig) -> Self {
        Self {
            max_restarts: config.supervisor_max_restarts,
            backoff: config.supervisor_backoff(),
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<(String, JoinHandle<TaskExit>)>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        }
    }

    /// Starts supervising a task.
    pub fn spawn(&mut self, name: impl Into<String>, factory: TaskFactory) {
        let name = name.into();
        let handle = tokio::spawn(supervise(
            name.clone(),
            factory,
            self.shutdown_rx.clone(),
            self.config,
        ));
        self.tasks.push((name, handle));
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Number of tasks whose supervision has not ended.
    pub fn running(&self) -> usize {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Signals every task to stop and waits for all of them.
    pub async fn shutdown(self) -> Vec<TaskExit> {
        let _ = self.shutdown_tx.send(true);
        let mut exits = Vec::with_capacity(self.tasks.len());
        for (name, handle) in self.tasks {
            let exit = match handle.await {
                Ok(exit) => exit,
                Err(_) => TaskExit {
                    name: name.clone(),
                    restarts: 0,
                    result: Err(SupervisorError::Aborted(name)),
                },
            };
            exits.push(exit);
        }
        exits
    }
}

async fn supervise(
    name: String,
    factory: TaskFactory,
    mut shutdown: watch::Receiver<bool>,
    config: SupervisorConfig,
) -> TaskExit {
    let mut restarts = 0;

    loop {
        let run = tokio::spawn(factory(shutdown.clone()));
        let error = match run.await {
            Ok(Ok(())) => {
                tracing::info!(task = %name, restarts, "Supervised task finished");
                return TaskExit {
                    name,
                    restarts,
                    result: Ok(()),
                };
            }
            Ok(Err(e)) => e.to_string(),
            Err(join) if join.is_panic() => "task panicked".to_string(),
            Err(join) => join.to_string(),
        };

        if *shutdown.borrow() {
            return TaskExit {
                name,
                restarts,
                result: Ok(()),
            };
        }

        if restarts >= config.max_restarts {
            tracing::error!(task = %name, restarts, error = %error, "Supervised task gave up");
            return TaskExit {
                result: Err(SupervisorError::RestartsExhausted {
                    name: name.clone(),
                    restarts,
                    last_error: error,
                }),
                name,
                restarts,
            };
        }

        restarts += 1;
        tracing::error!(task = %name, restarts, error = %error, "Supervised task crashed, restarting");

        tokio::select! {
            _ = tokio::time::sleep(config.backoff) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return TaskExit {
                        name,
                        restarts,
                        result: Ok(()),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::ErrorCode;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_restarts: u32) -> SupervisorConfig {
        SupervisorConfig {
            max_restarts,
            backoff: Duration::from_millis(10),
        }
    }

    fn until_shutdown() -> TaskFactory {
        Arc::new(|mut shutdown: watch::Receiver<bool>| {
            async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn shutdown_stops_running_tasks() {
        let mut supervisor = Supervisor::new(config(3));
        supervisor.spawn("poller", until_shutdown());
        assert_eq!(supervisor.task_names(), vec!["poller"]);

        let exits = supervisor.shutdown().await;

        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].name, "poller");
        assert_eq!(exits[0].restarts, 0);
        assert!(exits[0].result.is_ok());
    }

    #[tokio::test]
    async fn failing_task_is_restarted_until_ceiling() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let factory: TaskFactory = Arc::new(move |_shutdown| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DomainError::new(ErrorCode::InternalError, "boom"))
            }
            .boxed()
        });

        let mut supervisor = Supervisor::new(config(2));
        supervisor.spawn("flaky", factory);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(supervisor.running(), 0);

        let exits = supervisor.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(matches!(
            exits[0].result,
            Err(SupervisorError::RestartsExhausted { restarts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn panicking_task_is_restarted() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let factory: TaskFactory = Arc::new(move |mut shutdown: watch::Receiver<bool>| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    panic!("first run panics");
                }
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                Ok(())
            }
            .boxed()
        });

        let mut supervisor = Supervisor::new(config(3));
        supervisor.spawn("recovering", factory);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let exits = supervisor.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(exits[0].restarts, 1);
        assert!(exits[0].result.is_ok());
    }
}
