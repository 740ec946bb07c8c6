//! Polling loop over a set of processors.

use crate::processor::Processor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Runs every processor once per iteration on a background task.
///
/// An iteration that processed nothing is followed by `iteration_wait`;
/// otherwise the next iteration starts immediately.
pub struct StateMachineManager {
    name: String,
    processors: Arc<Vec<Arc<dyn Processor>>>,
    iteration_wait: Duration,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StateMachineManager {
    /// Create a manager
    pub fn new(name: impl Into<String>, iteration_wait: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            processors: Arc::new(Vec::new()),
            iteration_wait,
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Add a processor. Only allowed before [`start`](Self::start).
    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        Arc::make_mut(&mut self.processors).push(processor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every processor once, returning the total processed.
    pub async fn run_once(&self) -> usize {
        run_iteration(&self.processors).await
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the polling loop. Starting a running manager does nothing.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        self.shutdown_tx.send_replace(false);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let processors = Arc::clone(&self.processors);
        let wait = self.iteration_wait;
        let name = self.name.clone();

        info!(manager = %name, processors = processors.len(), "State machine started");

        *handle = Some(tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let processed = run_iteration(&processors).await;
                if processed > 0 {
                    debug!(manager = %name, processed, "Iteration complete");
                    tokio::task::yield_now().await;
                    continue;
                }

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!(manager = %name, "State machine stopped");
        }));
    }

    /// Signal shutdown and wait for the loop to finish its iteration.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(manager = %self.name, error = %e, "State machine task failed");
            }
        }
    }
}

async fn run_iteration(processors: &[Arc<dyn Processor>]) -> usize {
    let mut processed = 0;
    for processor in processors {
        processed += processor.process().await;
    }
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports work for the first `busy` calls, then idles.
    struct CountingProcessor {
        calls: AtomicUsize,
        busy: usize,
    }

    #[async_trait]
    impl Processor for CountingProcessor {
        fn description(&self) -> &str {
            "counting"
        }

        async fn process(&self) -> usize {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            usize::from(call < self.busy)
        }
    }

    #[tokio::test]
    async fn run_once_sums_processors() {
        let manager = StateMachineManager::new("test", Duration::from_millis(10))
            .processor(Arc::new(CountingProcessor {
                calls: AtomicUsize::new(0),
                busy: 5,
            }))
            .processor(Arc::new(CountingProcessor {
                calls: AtomicUsize::new(0),
                busy: 0,
            }));
        assert_eq!(manager.run_once().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loops_without_waiting_while_busy_then_sleeps() {
        let processor = Arc::new(CountingProcessor {
            calls: AtomicUsize::new(0),
            busy: 3,
        });
        let manager = StateMachineManager::new("test", Duration::from_secs(60))
            .processor(processor.clone());

        manager.start().await;
        assert!(manager.is_running().await);

        // three busy iterations and one idle one, then asleep for a minute
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), 4);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), 5);

        manager.stop().await;
        assert!(!manager.is_running().await);
    }
}
