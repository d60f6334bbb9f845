//! Attach session orchestration.
//!
//! This module contains:
//! - `Session`: what the caller attaches to (id, hijacked connection, resizer)
//! - `LocalTerminal`: the local side (endpoints plus byte reader/writer)
//! - `SessionRunner`: the per-session lifecycle
//!
//! Lifecycle: `Idle -> RawMode -> Streaming -> Draining -> Closed`.
//!
//! The session ends when remote output ends, when the user detaches, or when
//! the caller cancels. Local input reaching EOF or failing only stops that
//! direction; output keeps flowing until the remote side is done.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::{Direction, Error, Result, SessionConfig};

use crate::connection::{ContainerEngine, EngineResizer, HijackedConnection};
use crate::copier::{CopyResult, CopyTask, copy_inbound, copy_outbound};
use crate::escape::EscapeProxy;
use crate::raw_mode::RawModeGuard;
use crate::resize::{ResizeMonitor, Resizer, WindowChanges};
use crate::terminal::{StdinReader, TerminalEndpoint};

/// Where a session runner is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not started.
    Idle,
    /// Terminal switched to raw mode, copies not yet running.
    RawMode,
    /// Both copy directions running.
    Streaming,
    /// A termination condition was hit; tearing down.
    Draining,
    /// Finished. The runner is not reused.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::RawMode => "raw-mode",
            SessionState::Streaming => "streaming",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The remote half of an attach: id, hijacked connection and resize hook.
pub struct Session<C> {
    pub id: String,
    pub connection: C,
    pub resizer: Arc<dyn Resizer>,
}

impl<C: HijackedConnection> Session<C> {
    pub fn new(id: impl Into<String>, connection: C, resizer: Arc<dyn Resizer>) -> Self {
        Self {
            id: id.into(),
            connection,
            resizer,
        }
    }
}

impl<C> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

/// The local half of an attach.
pub struct LocalTerminal<R, W> {
    pub input: Arc<TerminalEndpoint>,
    pub output: Arc<TerminalEndpoint>,
    pub reader: R,
    pub writer: W,
}

impl<R, W> LocalTerminal<R, W> {
    pub fn new(input: TerminalEndpoint, output: TerminalEndpoint, reader: R, writer: W) -> Self {
        Self {
            input: Arc::new(input),
            output: Arc::new(output),
            reader,
            writer,
        }
    }
}

impl LocalTerminal<StdinReader, tokio::io::Stdout> {
    /// Process stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(
            TerminalEndpoint::stdin(),
            TerminalEndpoint::stdout(),
            StdinReader::new(),
            tokio::io::stdout(),
        )
    }
}

/// How the wait ended.
enum Ending {
    Outbound(CopyResult),
    Detached,
    Cancelled,
}

/// Runs one attach session from raw mode to teardown.
pub struct SessionRunner<R, W> {
    terminal: Option<LocalTerminal<R, W>>,
    config: SessionConfig,
    state: SessionState,
    ready: Option<oneshot::Sender<()>>,
    window_changes: Option<WindowChanges>,
}

impl<R, W> SessionRunner<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(terminal: LocalTerminal<R, W>) -> Self {
        Self {
            terminal: Some(terminal),
            config: SessionConfig::default(),
            state: SessionState::Idle,
            ready: None,
            window_changes: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Notify `tx` once both copy directions are running.
    pub fn with_ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready = Some(tx);
        self
    }

    /// Use `changes` instead of subscribing to `SIGWINCH`.
    pub fn with_window_changes(mut self, changes: WindowChanges) -> Self {
        self.window_changes = Some(changes);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Returns the outbound copy error if there was one, else `Cancelled`
    /// if the caller cancelled, else `Ok`. The terminal has been restored
    /// by the time this returns.
    pub async fn run<C: HijackedConnection>(
        &mut self,
        cancel: CancellationToken,
        session: Session<C>,
    ) -> Result<()> {
        if session.id.is_empty() {
            return Err(Error::EmptySessionId);
        }
        let Some(terminal) = self.terminal.take() else {
            return Err(Error::SessionClosed);
        };
        let LocalTerminal {
            input,
            output,
            reader,
            writer,
        } = terminal;

        let guard = match RawModeGuard::enter(input.clone()) {
            Ok(guard) => guard,
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };
        self.state = SessionState::RawMode;
        debug!(id = %session.id, "Terminal in raw mode");

        let mut resize_tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut resize_retry: Option<JoinHandle<bool>> = None;
        if input.is_terminal() {
            let monitor = ResizeMonitor::new(output.clone(), input.clone(), session.resizer.clone());
            let initial = monitor.initialize(
                self.config.resize_retries,
                self.config.resize_retry_interval,
            );
            resize_retry = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(id = %session.id, "Session cancelled during initial resize");
                    guard.restore();
                    self.state = SessionState::Closed;
                    return Err(Error::Cancelled);
                }
                retry = initial => retry,
            };
            if self.config.watch_resize {
                let changes = match self.window_changes.take() {
                    Some(changes) => Ok(changes),
                    None => WindowChanges::subscribe(),
                };
                match changes {
                    Ok(changes) => resize_tasks.push(monitor.watch(changes)),
                    Err(e) => warn!(error = %e, "Failed to watch window changes"),
                }
            }
        }

        let (remote_reader, remote_writer) = HijackedConnection::split(session.connection);
        let input_reader = EscapeProxy::new(reader, &self.config.detach_keys);
        let buffer_size = self.config.buffer_size;

        self.state = SessionState::Streaming;
        let outbound = copy_outbound(remote_reader, writer, guard.clone(), buffer_size);
        let inbound = copy_inbound(input_reader, remote_writer, guard.clone(), buffer_size);
        info!(id = %session.id, "Attached");

        if let Some(tx) = self.ready.take() {
            let _ = tx.send(());
        }

        let ending = self.wait(&cancel, outbound, inbound, &mut resize_tasks).await;

        guard.restore();
        if let Some(retry) = resize_retry {
            retry.abort();
        }
        self.state = SessionState::Closed;

        match ending {
            Ending::Outbound(CopyResult::Error(e)) => {
                warn!(id = %session.id, error = %e, "Session ended with error");
                Err(e)
            }
            Ending::Outbound(_) => {
                info!(id = %session.id, "Remote output ended");
                Ok(())
            }
            Ending::Detached => {
                info!(id = %session.id, "Detached");
                Ok(())
            }
            Ending::Cancelled => {
                info!(id = %session.id, "Session cancelled");
                Err(Error::Cancelled)
            }
        }
    }

    /// Wait for a termination condition, then stop every session task.
    async fn wait(
        &mut self,
        cancel: &CancellationToken,
        mut outbound: CopyTask,
        mut inbound: CopyTask,
        resize_tasks: &mut Vec<JoinHandle<()>>,
    ) -> Ending {
        let ending = tokio::select! {
            biased;

            _ = cancel.cancelled() => Ending::Cancelled,

            result = &mut outbound.result => Ending::Outbound(outbound_result(result)),

            result = &mut inbound.result => match result {
                Ok(CopyResult::EscapeDetected) => Ending::Detached,
                other => {
                    match other {
                        Ok(CopyResult::Error(e)) => debug!(error = %e, "Input copy failed"),
                        _ => debug!("Input copy finished, waiting for remote output"),
                    }
                    self.state = SessionState::Draining;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Ending::Cancelled,
                        result = &mut outbound.result => Ending::Outbound(outbound_result(result)),
                    }
                }
            },
        };

        // An outbound failure that raced the cancellation still wins.
        let ending = match ending {
            Ending::Cancelled => match outbound.result.try_recv() {
                Ok(CopyResult::Error(e)) => Ending::Outbound(CopyResult::Error(e)),
                _ => Ending::Cancelled,
            },
            other => other,
        };

        self.state = SessionState::Draining;
        outbound.abort();
        inbound.abort();
        for task in resize_tasks.iter() {
            task.abort();
        }
        // Both connection halves are dropped once the copy tasks are gone.
        let _ = outbound.handle.await;
        let _ = inbound.handle.await;
        for task in resize_tasks.drain(..) {
            let _ = task.await;
        }
        ending
    }
}

fn outbound_result(result: std::result::Result<CopyResult, oneshot::error::RecvError>) -> CopyResult {
    result.unwrap_or_else(|_| {
        CopyResult::Error(Error::stream(
            Direction::Outbound,
            io::Error::other("output copy stopped without a result"),
        ))
    })
}

impl<R, W> fmt::Debug for SessionRunner<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRunner")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

/// Run a session on process stdio with the default configuration.
pub async fn run_session<C: HijackedConnection>(
    cancel: CancellationToken,
    id: &str,
    connection: C,
    resizer: Arc<dyn Resizer>,
) -> Result<()> {
    if id.is_empty() {
        return Err(Error::EmptySessionId);
    }
    SessionRunner::new(LocalTerminal::stdio())
        .run(cancel, Session::new(id, connection, resizer))
        .await
}

/// Attach to `id` through `engine` and run a session on process stdio.
pub async fn attach_and_run<E>(
    engine: Arc<E>,
    cancel: CancellationToken,
    id: &str,
    config: SessionConfig,
) -> Result<()>
where
    E: ContainerEngine + 'static,
{
    if id.is_empty() {
        return Err(Error::EmptySessionId);
    }
    let connection = engine.attach(id).await?;
    debug!(id, "Attach connection established");
    let resizer: Arc<dyn Resizer> = Arc::new(EngineResizer::new(engine, id));

    SessionRunner::new(LocalTerminal::stdio())
        .with_config(config)
        .run(cancel, Session::new(id, connection, resizer))
        .await
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tether_core::Dimensions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf, WriteHalf};
    use tokio::sync::mpsc;

    use super::*;
    use crate::terminal::NotATerminal;
    use crate::testing::CountingTerminal;

    fn no_resize() -> Arc<dyn Resizer> {
        Arc::new(|_size: Dimensions| async { Ok(()) })
    }

    fn recording_resizer() -> (Arc<Mutex<Vec<Dimensions>>>, Arc<dyn Resizer>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let resizer = move |size: Dimensions| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(size);
                Ok(())
            }
        };
        (calls, Arc::new(resizer))
    }

    /// Local terminal over in-memory pipes. Returns the test's ends of the
    /// input and output pipes.
    fn piped_terminal(
        driver: Arc<dyn crate::terminal::TerminalDriver>,
    ) -> (
        LocalTerminal<DuplexStream, DuplexStream>,
        DuplexStream,
        DuplexStream,
    ) {
        let (reader, keyboard) = tokio::io::duplex(1024);
        let (writer, screen) = tokio::io::duplex(1024);
        let terminal = LocalTerminal::new(
            TerminalEndpoint::with_driver(driver.clone()),
            TerminalEndpoint::with_driver(driver),
            reader,
            writer,
        );
        (terminal, keyboard, screen)
    }

    #[tokio::test]
    async fn empty_id_is_rejected_before_raw_mode() {
        let driver = Arc::new(CountingTerminal::default());
        let (terminal, _keyboard, _screen) = piped_terminal(driver.clone());
        let (calls, resizer) = recording_resizer();
        let (connection, _remote) = tokio::io::duplex(64);

        let mut runner = SessionRunner::new(terminal);
        let err = runner
            .run(CancellationToken::new(), Session::new("", connection, resizer))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::EmptySessionId));
        assert_eq!(runner.state(), SessionState::Idle);
        assert_eq!(driver.enters(), 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn copies_both_ways_without_a_terminal() {
        let (terminal, mut keyboard, mut screen) = piped_terminal(Arc::new(NotATerminal));
        let (connection, mut remote) = tokio::io::duplex(1024);

        // Remote echoes everything back upper-cased, then hangs up.
        let remote_task = tokio::spawn(async move {
            let mut received = Vec::new();
            remote.read_to_end(&mut received).await.unwrap();
            remote
                .write_all(&received.to_ascii_uppercase())
                .await
                .unwrap();
        });

        keyboard.write_all(b"echo hi\n").await.unwrap();
        drop(keyboard);

        let mut runner = SessionRunner::new(terminal);
        runner
            .run(
                CancellationToken::new(),
                Session::new("c0ffee", connection, no_resize()),
            )
            .await
            .unwrap();
        remote_task.await.unwrap();

        let mut shown = Vec::new();
        screen.read_to_end(&mut shown).await.unwrap();
        assert_eq!(shown, b"ECHO HI\n");
        assert_eq!(runner.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn remote_eof_ends_session_while_input_is_blocked() {
        let driver = Arc::new(CountingTerminal::default());
        let (terminal, _keyboard, _screen) = piped_terminal(driver.clone());
        let (connection, remote) = tokio::io::duplex(64);
        drop(remote);

        let mut runner = SessionRunner::new(terminal)
            .with_config(SessionConfig::default().with_watch_resize(false));
        runner
            .run(
                CancellationToken::new(),
                Session::new("c0ffee", connection, no_resize()),
            )
            .await
            .unwrap();

        assert_eq!(driver.enters(), 1);
        assert_eq!(driver.restores(), 1);
        assert_eq!(runner.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn detach_ends_session_cleanly() {
        let driver = Arc::new(CountingTerminal::default());
        let (terminal, mut keyboard, _screen) = piped_terminal(driver.clone());
        let (connection, mut remote) = tokio::io::duplex(64);

        keyboard.write_all(b"ls\x10\x11").await.unwrap();

        let mut runner = SessionRunner::new(terminal)
            .with_config(SessionConfig::default().with_watch_resize(false));
        runner
            .run(
                CancellationToken::new(),
                Session::new("c0ffee", connection, no_resize()),
            )
            .await
            .unwrap();

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ls");
        assert_eq!(driver.restores(), 1);
    }

    #[tokio::test]
    async fn cancel_returns_promptly_and_restores() {
        let driver = Arc::new(CountingTerminal::default());
        let (terminal, _keyboard, _screen) = piped_terminal(driver.clone());
        let (connection, _remote) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut runner = SessionRunner::new(terminal)
            .with_config(SessionConfig::default().with_watch_resize(false));
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            runner.run(cancel, Session::new("c0ffee", connection, no_resize())),
        )
        .await
        .expect("run returns after cancel")
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(driver.restores(), 1);
        assert_eq!(runner.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn cancel_interrupts_a_hanging_initial_resize() {
        let driver = Arc::new(CountingTerminal::default());
        let (terminal, _keyboard, _screen) = piped_terminal(driver.clone());
        let (connection, mut remote) = tokio::io::duplex(64);
        let hanging: Arc<dyn Resizer> =
            Arc::new(|_size: Dimensions| std::future::pending::<Result<()>>());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut runner = SessionRunner::new(terminal)
            .with_config(SessionConfig::default().with_watch_resize(false));
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            runner.run(cancel, Session::new("c0ffee", connection, hanging)),
        )
        .await
        .expect("run returns after cancel")
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(driver.restores(), 1);
        assert_eq!(runner.state(), SessionState::Closed);

        // The connection was dropped with the session.
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn input_eof_waits_for_remote_output() {
        let (terminal, keyboard, mut screen) = piped_terminal(Arc::new(NotATerminal));
        let (connection, mut remote) = tokio::io::duplex(64);
        drop(keyboard);

        let remote_task = tokio::spawn(async move {
            let mut received = Vec::new();
            remote.read_to_end(&mut received).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.write_all(b"late output").await.unwrap();
        });

        let mut runner = SessionRunner::new(terminal);
        runner
            .run(
                CancellationToken::new(),
                Session::new("c0ffee", connection, no_resize()),
            )
            .await
            .unwrap();
        remote_task.await.unwrap();

        let mut shown = Vec::new();
        screen.read_to_end(&mut shown).await.unwrap();
        assert_eq!(shown, b"late output");
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
        }
    }

    /// Connection whose remote output fails on the first read.
    struct BrokenConnection {
        stream: DuplexStream,
    }

    impl HijackedConnection for BrokenConnection {
        type Reader = BrokenReader;
        type Writer = WriteHalf<DuplexStream>;

        fn split(self) -> (Self::Reader, Self::Writer) {
            let (_, writer) = tokio::io::split(self.stream);
            (BrokenReader, writer)
        }
    }

    #[tokio::test]
    async fn outbound_error_is_returned() {
        let driver = Arc::new(CountingTerminal::default());
        let (terminal, _keyboard, _screen) = piped_terminal(driver.clone());
        let (stream, _remote) = tokio::io::duplex(64);

        let mut runner = SessionRunner::new(terminal)
            .with_config(SessionConfig::default().with_watch_resize(false));
        let err = runner
            .run(
                CancellationToken::new(),
                Session::new("c0ffee", BrokenConnection { stream }, no_resize()),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Stream {
                direction: Direction::Outbound,
                ..
            }
        ));
        assert_eq!(driver.restores(), 1);
    }

    #[tokio::test]
    async fn terminal_input_pushes_initial_size_and_follows_changes() {
        let driver = Arc::new(CountingTerminal::default());
        let (terminal, _keyboard, _screen) = piped_terminal(driver.clone());
        let (connection, _remote) = tokio::io::duplex(64);
        let (calls, resizer) = recording_resizer();
        let (changes_tx, changes_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let watcher_calls = calls.clone();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            changes_tx.send(()).await.unwrap();
            while watcher_calls.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            trigger.cancel();
        });

        let mut runner =
            SessionRunner::new(terminal).with_window_changes(WindowChanges::from_channel(changes_rx));
        let err = runner
            .run(cancel, Session::new("c0ffee", connection, resizer))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[Dimensions::new(24, 80), Dimensions::new(24, 80)]
        );
    }

    #[tokio::test]
    async fn non_terminal_input_never_resizes() {
        let (terminal, _keyboard, _screen) = piped_terminal(Arc::new(NotATerminal));
        let (connection, remote) = tokio::io::duplex(64);
        let (calls, resizer) = recording_resizer();
        drop(remote);

        let mut runner = SessionRunner::new(terminal);
        runner
            .run(
                CancellationToken::new(),
                Session::new("c0ffee", connection, resizer),
            )
            .await
            .unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ready_signal_fires_once_streaming() {
        let (terminal, _keyboard, _screen) = piped_terminal(Arc::new(NotATerminal));
        let (connection, remote) = tokio::io::duplex(64);
        let (ready_tx, ready_rx) = oneshot::channel();

        let remote_task = tokio::spawn(async move {
            ready_rx.await.unwrap();
            drop(remote);
        });

        let mut runner = SessionRunner::new(terminal).with_ready_signal(ready_tx);
        runner
            .run(
                CancellationToken::new(),
                Session::new("c0ffee", connection, no_resize()),
            )
            .await
            .unwrap();
        remote_task.await.unwrap();
    }

    #[tokio::test]
    async fn runner_is_single_use() {
        let (terminal, _keyboard, _screen) = piped_terminal(Arc::new(NotATerminal));
        let (connection, remote) = tokio::io::duplex(64);
        drop(remote);

        let mut runner = SessionRunner::new(terminal);
        runner
            .run(
                CancellationToken::new(),
                Session::new("c0ffee", connection, no_resize()),
            )
            .await
            .unwrap();

        let (again, _remote) = tokio::io::duplex(64);
        let err = runner
            .run(
                CancellationToken::new(),
                Session::new("c0ffee", again, no_resize()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
    }

    #[test]
    fn state_display() {
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
