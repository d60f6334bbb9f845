//! Local terminal endpoints.
//!
//! Provides:
//! - The `TerminalDriver` seam over the OS terminal driver
//! - `TtyDriver`, the termios implementation for a file descriptor
//! - `TerminalEndpoint`, which owns the saved mode of one local stream
//! - `StdinReader`, a non-blocking async view of process stdin

use std::io;
#[cfg(not(unix))]
use std::io::Read;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use tether_core::{Dimensions, Error, Result};

/// Snapshot of a terminal's mode taken before switching to raw mode.
#[derive(Clone)]
pub struct TerminalMode {
    #[cfg(unix)]
    termios: Option<libc::termios>,
}

impl TerminalMode {
    /// A snapshot that carries no OS state, for drivers that emulate a
    /// terminal.
    pub fn emulated() -> Self {
        Self {
            #[cfg(unix)]
            termios: None,
        }
    }

    #[cfg(unix)]
    fn from_termios(termios: libc::termios) -> Self {
        Self {
            termios: Some(termios),
        }
    }
}

impl std::fmt::Debug for TerminalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[cfg(unix)]
        let captured = self.termios.is_some();
        #[cfg(not(unix))]
        let captured = false;
        f.debug_struct("TerminalMode")
            .field("termios", &captured)
            .finish()
    }
}

/// Platform terminal operations for one local stream.
pub trait TerminalDriver: Send + Sync {
    /// Whether the stream is backed by a terminal device.
    fn is_terminal(&self) -> bool;

    /// Capture the current mode and switch the device to raw mode.
    fn enter_raw(&self) -> io::Result<TerminalMode>;

    /// Put back a mode captured by `enter_raw`.
    fn restore(&self, mode: &TerminalMode) -> io::Result<()>;

    /// Current window size.
    fn size(&self) -> io::Result<Dimensions>;
}

/// termios driver for a file descriptor.
#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
pub struct TtyDriver {
    fd: RawFd,
}

#[cfg(unix)]
impl TtyDriver {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

#[cfg(unix)]
impl TerminalDriver for TtyDriver {
    fn is_terminal(&self) -> bool {
        unsafe { libc::isatty(self.fd) == 1 }
    }

    fn enter_raw(&self) -> io::Result<TerminalMode> {
        let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
        let result = unsafe { libc::tcgetattr(self.fd, termios.as_mut_ptr()) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        let original = unsafe { termios.assume_init() };

        let mut raw = original;

        // Input flags: disable break signal, CR->NL mapping, parity checking,
        // 8th bit stripping, and XON/XOFF flow control
        raw.c_iflag &= !(libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON);

        // Output flags: disable output processing
        raw.c_oflag &= !libc::OPOST;

        // Control flags: set 8-bit characters
        raw.c_cflag |= libc::CS8;

        // Local flags: disable echo, canonical mode, signals, and extended input
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);

        // Control characters: read returns after 1 byte, no timeout
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;

        let result = unsafe { libc::tcsetattr(self.fd, libc::TCSAFLUSH, &raw) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(TerminalMode::from_termios(original))
    }

    fn restore(&self, mode: &TerminalMode) -> io::Result<()> {
        let Some(original) = mode.termios.as_ref() else {
            return Ok(());
        };
        let result = unsafe { libc::tcsetattr(self.fd, libc::TCSAFLUSH, original) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn size(&self) -> io::Result<Dimensions> {
        let mut winsize = std::mem::MaybeUninit::<libc::winsize>::uninit();
        let result = unsafe { libc::ioctl(self.fd, libc::TIOCGWINSZ, winsize.as_mut_ptr()) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        let winsize = unsafe { winsize.assume_init() };
        Ok(Dimensions::new(winsize.ws_row, winsize.ws_col))
    }
}

/// Driver for streams without a terminal device behind them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotATerminal;

impl TerminalDriver for NotATerminal {
    fn is_terminal(&self) -> bool {
        false
    }

    fn enter_raw(&self) -> io::Result<TerminalMode> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "not a terminal"))
    }

    fn restore(&self, _mode: &TerminalMode) -> io::Result<()> {
        Ok(())
    }

    fn size(&self) -> io::Result<Dimensions> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "not a terminal"))
    }
}

/// One local input or output stream and its saved terminal mode.
///
/// The saved mode is set only by a successful `enter_raw_mode` and cleared
/// by `restore_raw_mode`; when the stream is not a terminal both are no-ops.
pub struct TerminalEndpoint {
    driver: Arc<dyn TerminalDriver>,
    is_terminal: bool,
    saved: Mutex<Option<TerminalMode>>,
}

impl TerminalEndpoint {
    /// Wrap a local stream by its file descriptor.
    #[cfg(unix)]
    pub fn wrap<S: AsRawFd>(stream: &S) -> Self {
        Self::with_driver(Arc::new(TtyDriver::new(stream.as_raw_fd())))
    }

    /// Wrap a local stream on a platform without termios.
    #[cfg(not(unix))]
    pub fn wrap<S>(_stream: &S) -> Self {
        Self::with_driver(Arc::new(NotATerminal))
    }

    /// Endpoint for process stdin.
    pub fn stdin() -> Self {
        Self::wrap(&io::stdin())
    }

    /// Endpoint for process stdout.
    pub fn stdout() -> Self {
        Self::wrap(&io::stdout())
    }

    /// Build an endpoint over an arbitrary driver.
    pub fn with_driver(driver: Arc<dyn TerminalDriver>) -> Self {
        let is_terminal = driver.is_terminal();
        Self {
            driver,
            is_terminal,
            saved: Mutex::new(None),
        }
    }

    /// Whether the stream was a terminal device when wrapped.
    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    /// Whether a mode snapshot is currently held.
    pub fn has_saved_state(&self) -> bool {
        self.saved.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Switch to raw mode, remembering the previous mode.
    pub fn enter_raw_mode(&self) -> Result<()> {
        if !self.is_terminal {
            return Ok(());
        }

        let mode = self
            .driver
            .enter_raw()
            .map_err(|source| Error::TerminalMode {
                operation: "enter raw mode",
                source,
            })?;

        if let Ok(mut saved) = self.saved.lock() {
            *saved = Some(mode);
        }
        debug!("Entered raw terminal mode");
        Ok(())
    }

    /// Put back the mode saved by `enter_raw_mode`, if any.
    pub fn restore_raw_mode(&self) -> Result<()> {
        let mode = match self.saved.lock() {
            Ok(mut saved) => saved.take(),
            Err(_) => None,
        };
        let Some(mode) = mode else {
            return Ok(());
        };

        self.driver
            .restore(&mode)
            .map_err(|source| Error::TerminalMode {
                operation: "restore",
                source,
            })?;
        debug!("Restored terminal settings");
        Ok(())
    }

    /// Current window size of the underlying device.
    pub fn size(&self) -> Result<Dimensions> {
        self.driver.size().map_err(Error::Io)
    }
}

impl std::fmt::Debug for TerminalEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalEndpoint")
            .field("is_terminal", &self.is_terminal)
            .field("saved", &self.has_saved_state())
            .finish()
    }
}

/// How long the stdin thread waits for input before checking whether its
/// reader is still alive.
#[cfg(unix)]
const STDIN_POLL_MS: libc::c_int = 50;

/// Async stdin reader.
///
/// Spawns a blocking thread to read from stdin and hands data over an
/// unbounded channel, so reads never block the runtime. On unix the thread
/// only reads once `poll` reports input, and exits within one poll interval
/// of the reader being dropped, so a later reader of the same terminal gets
/// every keystroke typed after this one is gone.
pub struct StdinReader {
    rx: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
}

impl StdinReader {
    /// Create a new stdin reader.
    #[cfg(unix)]
    pub fn new() -> Self {
        Self::from_fd(io::stdin().as_raw_fd())
    }

    /// Create a new stdin reader.
    #[cfg(not(unix))]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            let mut stdin_lock = stdin.lock();
            pump(&tx, |buf| stdin_lock.read(buf), || Ok(true));
        });
        Self::with_receiver(rx)
    }

    /// Read from an arbitrary descriptor that outlives the reader thread.
    #[cfg(unix)]
    pub(crate) fn from_fd(fd: RawFd) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            pump(&tx, |buf| read_fd(fd, buf), || wait_readable(fd, &tx));
        });
        Self::with_receiver(rx)
    }

    fn with_receiver(rx: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

/// Reader thread body. `ready` blocks until a read will not block and
/// returns false once nobody is listening.
fn pump(
    tx: &mpsc::UnboundedSender<io::Result<Vec<u8>>>,
    mut read: impl FnMut(&mut [u8]) -> io::Result<usize>,
    mut ready: impl FnMut() -> io::Result<bool>,
) {
    let mut buf = [0u8; 4096];

    loop {
        match ready() {
            Ok(true) => {}
            Ok(false) => {
                debug!("stdin receiver dropped");
                break;
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
        match read(&mut buf) {
            Ok(0) => {
                debug!("stdin EOF");
                break;
            }
            Ok(n) => {
                trace!(len = n, "stdin read");
                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                    debug!("stdin receiver dropped");
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
    debug!("stdin reader thread exiting");
}

/// Unbuffered read, so nothing is held back from `poll`.
#[cfg(unix)]
fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

#[cfg(unix)]
fn wait_readable(
    fd: RawFd,
    tx: &mpsc::UnboundedSender<io::Result<Vec<u8>>>,
) -> io::Result<bool> {
    loop {
        if tx.is_closed() {
            return Ok(false);
        }
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let result = unsafe { libc::poll(&mut pfd, 1, STDIN_POLL_MS) };
        if result > 0 {
            // Hang-ups and errors surface from the read.
            return Ok(true);
        }
        if result < 0 {
            let e = io::Error::last_os_error();
            if e.kind() != io::ErrorKind::Interrupted {
                return Err(e);
            }
        }
    }
}

impl Default for StdinReader {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRead for StdinReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.offset >= this.pending.len() {
            match this.rx.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                // Sender gone: EOF
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(Some(Ok(data))) => {
                    this.pending = data;
                    this.offset = 0;
                }
            }
        }

        let available = &this.pending[this.offset..];
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        this.offset += n;
        Poll::Ready(Ok(()))
    }
}
