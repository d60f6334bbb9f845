//! Remote terminal size synchronisation.
//!
//! Resize failures never end a session: a wrong size is a display problem,
//! so every failure here is logged and absorbed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tether_core::{Dimensions, Error, Result};

use crate::terminal::TerminalEndpoint;

/// Pushes new dimensions to the remote pseudo-terminal.
#[async_trait]
pub trait Resizer: Send + Sync {
    async fn resize(&self, size: Dimensions) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Resizer for F
where
    F: Fn(Dimensions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn resize(&self, size: Dimensions) -> Result<()> {
        (self)(size).await
    }
}

enum Source {
    #[cfg(unix)]
    Signal(tokio::signal::unix::Signal),
    Channel(mpsc::Receiver<()>),
    Never,
}

/// Subscription to local window-change notifications, owned by one session.
pub struct WindowChanges {
    source: Source,
}

impl WindowChanges {
    /// Subscribe to `SIGWINCH`.
    #[cfg(unix)]
    pub fn subscribe() -> Result<Self> {
        let signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())?;
        Ok(Self {
            source: Source::Signal(signal),
        })
    }

    /// No window-change notifications on this platform.
    #[cfg(not(unix))]
    pub fn subscribe() -> Result<Self> {
        Ok(Self::never())
    }

    /// Notifications driven by a channel, one per `()` sent.
    pub fn from_channel(rx: mpsc::Receiver<()>) -> Self {
        Self {
            source: Source::Channel(rx),
        }
    }

    /// A subscription that never fires.
    pub fn never() -> Self {
        Self {
            source: Source::Never,
        }
    }

    /// Wait for the next change; `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<()> {
        match &mut self.source {
            #[cfg(unix)]
            Source::Signal(signal) => signal.recv().await,
            Source::Channel(rx) => rx.recv().await,
            Source::Never => None,
        }
    }
}

/// Keeps the remote pseudo-terminal the same size as the local one.
#[derive(Clone)]
pub struct ResizeMonitor {
    output: Arc<TerminalEndpoint>,
    input: Arc<TerminalEndpoint>,
    resizer: Arc<dyn Resizer>,
}

impl ResizeMonitor {
    pub fn new(
        output: Arc<TerminalEndpoint>,
        input: Arc<TerminalEndpoint>,
        resizer: Arc<dyn Resizer>,
    ) -> Self {
        Self {
            output,
            input,
            resizer,
        }
    }

    /// Local size, preferring the output terminal.
    fn current_size(&self) -> Result<Dimensions> {
        if self.output.is_terminal() {
            return self.output.size();
        }
        self.input.size()
    }

    /// Read the local size and push it to the remote side.
    ///
    /// A (0, 0) reading is rejected with `InvalidSize` and not sent.
    pub async fn push_current_size(&self) -> Result<()> {
        let size = self.current_size()?.validate()?;
        debug!(cols = size.cols, rows = size.rows, "Pushing terminal size");
        self.resizer.resize(size).await
    }

    /// Push the initial size, retrying in the background on failure.
    ///
    /// Returns the retry task when the first push failed. Each retry waits
    /// `interval` first. The task yields whether a retry succeeded.
    pub async fn initialize(&self, retries: u32, interval: Duration) -> Option<JoinHandle<bool>> {
        let first = match self.push_current_size().await {
            Ok(()) => return None,
            Err(e) => e,
        };
        debug!(error = %first, "Initial resize failed, retrying in background");

        let monitor = self.clone();
        Some(tokio::spawn(async move {
            let mut last: Option<Error> = Some(first);
            for attempt in 1..=retries {
                tokio::time::sleep(interval).await;
                match monitor.push_current_size().await {
                    Ok(()) => {
                        debug!(attempt, "Resize succeeded on retry");
                        return true;
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "Resize retry failed");
                        last = Some(e);
                    }
                }
            }
            if let Some(e) = last {
                info!(error = %e, "Failed to resize terminal, remote session keeps its default size");
            }
            false
        }))
    }

    /// Push the size on every window change until the subscription ends or
    /// the task is aborted.
    pub fn watch(&self, mut changes: WindowChanges) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            while changes.recv().await.is_some() {
                match monitor.push_current_size().await {
                    Ok(()) => {}
                    Err(e) if !e.is_fatal() => debug!(error = %e, "Skipped resize"),
                    Err(e) => warn!(error = %e, "Failed to resize terminal"),
                }
            }
            debug!("Window change subscription ended");
        })
    }
}

impl std::fmt::Debug for ResizeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResizeMonitor")
            .field("output", &self.output)
            .field("input", &self.input)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::terminal::{NotATerminal, TerminalDriver};
    use crate::testing::CountingTerminal;

    /// Fails the first `failures` calls, records every call.
    struct FlakyResizer {
        failures: usize,
        calls: Mutex<Vec<Dimensions>>,
    }

    #[async_trait]
    impl Resizer for FlakyResizer {
        async fn resize(&self, size: Dimensions) -> Result<()> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(size);
            if calls.len() <= self.failures {
                return Err(Error::Engine {
                    message: "no such exec session".into(),
                });
            }
            Ok(())
        }
    }

    fn flaky(failures: usize) -> Arc<FlakyResizer> {
        Arc::new(FlakyResizer {
            failures,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn endpoint(driver: Arc<dyn TerminalDriver>) -> Arc<TerminalEndpoint> {
        Arc::new(TerminalEndpoint::with_driver(driver))
    }

    fn sized(rows: u16, cols: u16) -> Arc<CountingTerminal> {
        Arc::new(CountingTerminal::sized(rows, cols))
    }

    fn monitor(driver: Arc<dyn TerminalDriver>, resizer: Arc<dyn Resizer>) -> ResizeMonitor {
        ResizeMonitor::new(endpoint(driver), endpoint(Arc::new(NotATerminal)), resizer)
    }

    #[tokio::test]
    async fn push_sends_current_size() {
        let resizer = flaky(0);
        let monitor = monitor(sized(24, 80), resizer.clone());

        monitor.push_current_size().await.unwrap();
        assert_eq!(*resizer.calls.lock().unwrap(), vec![Dimensions::new(24, 80)]);
    }

    #[tokio::test]
    async fn zero_size_is_not_sent() {
        let resizer = flaky(0);
        let monitor = monitor(sized(0, 0), resizer.clone());

        let err = monitor.push_current_size().await.unwrap_err();
        assert!(matches!(err, Error::InvalidSize { .. }));
        assert!(resizer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_input_when_output_is_not_a_terminal() {
        let resizer = flaky(0);
        let monitor = ResizeMonitor::new(
            endpoint(Arc::new(NotATerminal)),
            endpoint(sized(50, 132)),
            resizer.clone(),
        );

        monitor.push_current_size().await.unwrap();
        assert_eq!(*resizer.calls.lock().unwrap(), vec![Dimensions::new(50, 132)]);
    }

    #[tokio::test]
    async fn resizer_error_propagates() {
        let monitor = monitor(sized(24, 80), flaky(1));
        let err = monitor.push_current_size().await.unwrap_err();
        assert!(matches!(err, Error::Engine { .. }));
    }

    #[tokio::test]
    async fn closures_are_resizers() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let resizer = move |size: Dimensions| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(size.cols as usize, Ordering::SeqCst);
                Ok(())
            }
        };
        let monitor = monitor(sized(24, 80), Arc::new(resizer));

        monitor.push_current_size().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 80);
    }

    #[tokio::test]
    async fn initialize_without_failure_spawns_nothing() {
        let resizer = flaky(0);
        let monitor = monitor(sized(24, 80), resizer.clone());

        let retry = monitor.initialize(5, Duration::from_millis(10)).await;
        assert!(retry.is_none());
        assert_eq!(resizer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_retries_until_success_then_stops() {
        // Initial push plus two retries fail; the third retry succeeds.
        let resizer = flaky(3);
        let monitor = monitor(sized(24, 80), resizer.clone());

        let retry = monitor
            .initialize(5, Duration::from_millis(10))
            .await
            .expect("retry task");
        assert!(retry.await.unwrap());
        assert_eq!(resizer.calls.lock().unwrap().len(), 4);

        // Nothing else fires later.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(resizer.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_gives_up_after_retries() {
        let resizer = flaky(usize::MAX);
        let monitor = monitor(sized(24, 80), resizer.clone());

        let start = tokio::time::Instant::now();
        let retry = monitor
            .initialize(5, Duration::from_millis(10))
            .await
            .expect("retry task");
        assert!(!retry.await.unwrap());
        assert_eq!(resizer.calls.lock().unwrap().len(), 6);
        // Five waits of one interval each.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(50) && waited < Duration::from_millis(60));
    }

    #[tokio::test]
    async fn initialize_does_not_block_on_retries() {
        let resizer = flaky(usize::MAX);
        let monitor = monitor(sized(24, 80), resizer.clone());

        let retry = monitor.initialize(5, Duration::from_secs(3600)).await;
        // Returned immediately with the background task pending.
        let retry = retry.expect("retry task");
        assert!(!retry.is_finished());
        retry.abort();
    }

    #[tokio::test]
    async fn watch_pushes_on_each_change_and_survives_failures() {
        let driver = sized(24, 80);
        let resizer = flaky(1);
        let monitor = monitor(driver.clone(), resizer.clone());
        let (tx, rx) = mpsc::channel(4);

        let watcher = monitor.watch(WindowChanges::from_channel(rx));

        tx.send(()).await.unwrap();
        driver.set_size(40, 120);
        tx.send(()).await.unwrap();
        drop(tx);
        watcher.await.unwrap();

        let calls = resizer.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], Dimensions::new(40, 120));
    }

    #[tokio::test]
    async fn never_source_ends_immediately() {
        let mut changes = WindowChanges::never();
        assert!(changes.recv().await.is_none());
    }

    #[tokio::test]
    async fn watch_skips_zero_size_and_keeps_going() {
        let driver = sized(0, 0);
        let resizer = flaky(0);
        let monitor = monitor(driver.clone(), resizer.clone());
        let (tx, rx) = mpsc::channel(4);

        let watcher = monitor.watch(WindowChanges::from_channel(rx));

        tx.send(()).await.unwrap();
        // Wait until the zero-size event has been consumed.
        while tx.capacity() < 4 {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        driver.set_size(30, 100);
        tx.send(()).await.unwrap();
        drop(tx);
        watcher.await.unwrap();

        assert_eq!(
            *resizer.calls.lock().unwrap(),
            vec![Dimensions::new(30, 100)]
        );
    }
}
