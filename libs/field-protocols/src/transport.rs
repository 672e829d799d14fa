//! Transport manager
//!
//! Owns the TCP stream (one of several candidate ports) or the UDP socket
//! of a client and performs request/response exchanges:
//!
//! - `open` tries every configured TCP port in order, starting at the
//!   remembered one; one error only when all of them fail
//! - `exchange` writes the request, then polls for response bytes every
//!   10 ms until the codec accepts a frame or the receive window closes
//! - timeouts retry on the same port up to `retry_count` attempts; when the
//!   budget runs out a TCP link is closed and the next call reconnects on
//!   the next port (round-robin), a UDP link surfaces the timeout
//! - codec rejections abort immediately; correlation misses either wait
//!   for another frame in place or re-send, depending on the protocol

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use field_comlink::{
    noop_observer, ConnectionState, LinkError, LinkLogger, LogTag, Result, SharedObserver,
    ValidationError,
};

/// Receive poll period
pub const POLL_INTERVAL_MS: u64 = 10;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

const READ_CHUNK: usize = 4096;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Udp,
}

/// Connection descriptor
///
/// Mutable only while the transport is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    pub host: String,
    /// Base port; TCP candidates are `port .. port + port_count`
    pub port: u16,
    #[serde(default = "default_port_count")]
    pub port_count: u16,
    /// Receive window per attempt; `None` takes the protocol default
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// UDP local port (0 = ephemeral)
    #[serde(default)]
    pub local_port: u16,
}

fn default_port_count() -> u16 {
    1
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl TransportConfig {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: TransportKind::Tcp,
            host: host.into(),
            port,
            port_count: default_port_count(),
            timeout_ms: None,
            retry_count: DEFAULT_RETRY_COUNT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            local_port: 0,
        }
    }

    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: TransportKind::Udp,
            ..Self::tcp(host, port)
        }
    }

    pub fn with_port_count(mut self, count: u16) -> Self {
        self.port_count = count;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Fill in the receive window when none was configured
    pub fn with_default_timeout(mut self, ms: u64) -> Self {
        self.timeout_ms.get_or_insert(ms);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Candidate port at `index`
    pub fn port_at(&self, index: u16) -> u16 {
        self.port.wrapping_add(index)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(LinkError::config("transport host is empty"));
        }
        if self.port == 0 {
            return Err(LinkError::config("transport port must be nonzero"));
        }
        if self.port_count == 0 {
            return Err(LinkError::config("port_count must be at least 1"));
        }
        if u32::from(self.port) + u32::from(self.port_count) - 1 > u32::from(u16::MAX) {
            return Err(LinkError::config(format!(
                "port range {}+{} exceeds 65535",
                self.port, self.port_count
            )));
        }
        if self.retry_count == 0 {
            return Err(LinkError::config("retry_count must be at least 1"));
        }
        if self.timeout_ms == Some(0) {
            return Err(LinkError::config("timeout_ms must be nonzero"));
        }
        Ok(())
    }
}

// ============================================================================
// Exchange policy
// ============================================================================

/// What to do after a response failed correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceivePolicy {
    /// Keep the request outstanding and wait for another frame
    #[default]
    InPlace,
    /// Send the request again, then receive
    Resend,
}

/// Codec verdict on the bytes received so far
#[derive(Debug)]
pub enum Verdict<T> {
    /// Valid frame, decoded
    Complete(T),
    /// More bytes needed
    Incomplete,
    /// Not the response we are waiting for; try again within the budget
    ///
    /// `frame_len` is the size of the rejected frame when the codec can
    /// tell. An in-place retry drops only those bytes and keeps checking
    /// whatever followed them.
    Retry {
        error: LinkError,
        frame_len: Option<usize>,
    },
    /// Well-formed rejection or broken frame; stop now
    Reject(LinkError),
}

impl<T> Verdict<T> {
    /// Classify a decode outcome; `Ok(None)` means the frame is incomplete
    pub fn classify(
        outcome: Result<Option<T>>,
        retriable: impl Fn(&ValidationError) -> bool,
    ) -> Self {
        match outcome {
            Ok(Some(value)) => Verdict::Complete(value),
            Ok(None) => Verdict::Incomplete,
            Err(LinkError::Validation(v)) if retriable(&v) => Verdict::Retry {
                error: LinkError::Validation(v),
                frame_len: None,
            },
            Err(e) => Verdict::Reject(e),
        }
    }

    /// Record the length of the frame a `Retry` rejected
    pub fn with_frame_len(self, len: Option<usize>) -> Self {
        match self {
            Verdict::Retry { error, .. } => Verdict::Retry {
                error,
                frame_len: len,
            },
            other => other,
        }
    }
}

/// Transport counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportStats {
    pub requests: u64,
    pub responses: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub timeouts: u64,
    pub validation_failures: u64,
    pub failovers: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
}

// ============================================================================
// Link
// ============================================================================

#[derive(Debug)]
enum Link {
    Tcp { stream: TcpStream, target: String },
    Udp { socket: UdpSocket, remote: SocketAddr },
}

impl Link {
    fn target(&self) -> String {
        match self {
            Link::Tcp { target, .. } => format!("tcp://{}", target),
            Link::Udp { remote, .. } => format!("udp://{}", remote),
        }
    }

    fn is_tcp(&self) -> bool {
        matches!(self, Link::Tcp { .. })
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Link::Tcp { stream, .. } => stream.write_all(data).await,
            Link::Udp { socket, remote } => {
                let sent = socket.send_to(data, *remote).await?;
                if sent != data.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("datagram truncated: {} of {} bytes", sent, data.len()),
                    ));
                }
                Ok(())
            },
        }
    }

    /// Non-blocking read; `None` when nothing is available right now
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let result = match self {
            Link::Tcp { stream, .. } => match stream.try_read(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ))
                },
                other => other,
            },
            Link::Udp { socket, .. } => socket.try_recv_from(buf).map(|(n, _from)| n),
        };
        match result {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

enum Failure {
    Timeout(LinkError),
    Retry(LinkError),
    Reject(LinkError),
    Fatal(LinkError),
}

// ============================================================================
// Transport manager
// ============================================================================

pub struct TransportManager {
    config: RwLock<TransportConfig>,
    link: tokio::sync::Mutex<Option<Link>>,
    state: Mutex<ConnectionState>,
    port_index: AtomicU16,
    stats: Mutex<TransportStats>,
    logger: LinkLogger,
    observer: SharedObserver,
    cancel: Mutex<CancellationToken>,
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("config", &*self.config.read())
            .field("state", &self.state())
            .field("port_index", &self.port_index.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TransportManager {
    pub fn new(config: TransportConfig, logger: LinkLogger) -> Self {
        Self {
            config: RwLock::new(config),
            link: tokio::sync::Mutex::new(None),
            state: Mutex::new(ConnectionState::Closed),
            port_index: AtomicU16::new(0),
            stats: Mutex::new(TransportStats::default()),
            logger,
            observer: noop_observer(),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> TransportConfig {
        self.config.read().clone()
    }

    /// Replace the connection descriptor; only allowed while closed
    pub fn set_config(&self, config: TransportConfig) -> Result<()> {
        if self.state() != ConnectionState::Closed {
            return Err(LinkError::config(
                "transport settings cannot change while the link is open",
            ));
        }
        config.validate()?;
        *self.config.write() = config;
        self.port_index.store(0, Ordering::Release);
        Ok(())
    }

    /// Token checked at the top of every receive poll
    pub fn set_cancellation(&self, token: CancellationToken) {
        *self.cancel.lock() = token;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Port the next TCP connect starts with (the active one while open)
    pub fn active_port(&self) -> u16 {
        let config = self.config.read();
        config.port_at(self.port_index.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.lock().clone()
    }

    pub fn logger(&self) -> &LinkLogger {
        &self.logger
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    // ---- open / close ----------------------------------------------------

    pub async fn open(&self) -> Result<()> {
        let mut guard = self.link.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let config = self.config();
        config.validate()?;
        self.set_state(ConnectionState::Connecting);

        let result = match config.kind {
            TransportKind::Tcp => self.connect_tcp(&config).await,
            TransportKind::Udp => Self::bind_udp(&config).await,
        };

        match result {
            Ok(link) => {
                self.logger.connect(&link.target(), "opened");
                *guard = Some(link);
                self.set_state(ConnectionState::Open);
                Ok(())
            },
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                self.logger.exception("open", &e);
                Err(e)
            },
        }
    }

    async fn connect_tcp(&self, config: &TransportConfig) -> Result<Link> {
        let count = config.port_count.max(1);
        let start = self.port_index.load(Ordering::Acquire) % count;

        for i in 0..count {
            let index = (start + i) % count;
            let target = format!("{}:{}", config.host, config.port_at(index));
            self.stats.lock().connect_attempts += 1;

            match timeout(config.connect_timeout(), TcpStream::connect(&target)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("TCP_NODELAY: {}", e);
                    }
                    self.port_index.store(index, Ordering::Release);
                    return Ok(Link::Tcp { stream, target });
                },
                Ok(Err(e)) => {
                    self.stats.lock().connect_failures += 1;
                    debug!("[{}] TCP connect {} failed: {}", self.logger.name(), target, e);
                },
                Err(_) => {
                    self.stats.lock().connect_failures += 1;
                    debug!("[{}] TCP connect {} timed out", self.logger.name(), target);
                },
            }
        }

        let last = config.port_at(count - 1);
        Err(LinkError::connection(format!(
            "all connections failed: {} ports {}..={}",
            config.host, config.port, last
        )))
    }

    async fn bind_udp(config: &TransportConfig) -> Result<Link> {
        let remote = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .map_err(|e| LinkError::connection(format!("resolve {}: {}", config.host, e)))?
            .next()
            .ok_or_else(|| LinkError::connection(format!("no address for {}", config.host)))?;

        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, config.local_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, config.local_port).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| LinkError::connection(format!("bind {}: {}", local, e)))?;

        Ok(Link::Udp { socket, remote })
    }

    pub async fn close(&self) {
        let mut guard = self.link.lock().await;
        if let Some(link) = guard.take() {
            self.logger.disconnect(&format!("{} closed", link.target()));
        }
        self.set_state(ConnectionState::Closed);
    }

    /// Move to the next candidate port; returns it
    fn advance_port(&self) -> u16 {
        let config = self.config.read();
        let count = config.port_count.max(1);
        let next = (self.port_index.load(Ordering::Acquire) + 1) % count;
        self.port_index.store(next, Ordering::Release);
        config.port_at(next)
    }

    // ---- exchange ------------------------------------------------------

    /// Send `request` and receive one response accepted by `check`
    ///
    /// Opens the link first when it is closed.
    pub async fn exchange<T, F>(&self, request: &[u8], policy: ReceivePolicy, mut check: F) -> Result<T>
    where
        F: FnMut(&[u8]) -> Verdict<T>,
    {
        if !self.is_open() {
            self.open().await?;
        }

        let config = self.config();
        let attempts = config.retry_count.max(1);
        let window = config.timeout();
        let cancel = self.cancel.lock().clone();

        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(LinkError::NotConnected)?;
        let target = link.target();
        let is_tcp = link.is_tcp();

        self.stats.lock().requests += 1;
        let mut last_error = LinkError::timeout(format!("no response from {}", target));
        let mut resend = true;

        for attempt in 1..=attempts {
            if resend {
                self.observer.on_sending(request);
                self.logger.frame(LogTag::Send, request);
                if let Err(e) = link.write(request).await {
                    let err = LinkError::stream(format!("send to {} failed: {}", target, e));
                    self.logger.exception("send", &err);
                    *guard = None;
                    self.set_state(ConnectionState::Closed);
                    return Err(err);
                }
                self.stats.lock().bytes_sent += request.len() as u64;
            }

            match self.receive(link, window, policy, &cancel, &mut check).await {
                Ok(value) => {
                    self.stats.lock().responses += 1;
                    return Ok(value);
                },
                Err(Failure::Timeout(e)) => {
                    self.stats.lock().timeouts += 1;
                    self.logger
                        .exception(&format!("receive attempt {}/{}", attempt, attempts), &e);
                    resend = true;
                    last_error = e;
                },
                Err(Failure::Retry(e)) => {
                    self.stats.lock().validation_failures += 1;
                    self.logger
                        .exception(&format!("receive attempt {}/{}", attempt, attempts), &e);
                    resend = policy == ReceivePolicy::Resend;
                    last_error = e;
                },
                Err(Failure::Reject(e)) => {
                    self.stats.lock().validation_failures += 1;
                    self.logger.exception("response rejected", &e);
                    return Err(e);
                },
                Err(Failure::Fatal(e)) => {
                    if !e.is_terminated() {
                        self.logger.exception("receive", &e);
                        *guard = None;
                        self.set_state(ConnectionState::Closed);
                        self.logger.disconnect(&format!("{} dropped", target));
                    }
                    return Err(e);
                },
            }
        }

        if !is_tcp {
            return Err(last_error);
        }

        *guard = None;
        self.set_state(ConnectionState::Closed);
        let next = self.advance_port();
        self.stats.lock().failovers += 1;
        self.logger.note(&format!(
            "no valid response from {} after {} attempts, next connect uses port {}",
            target, attempts, next
        ));
        Err(LinkError::connection(format!(
            "no valid response from {} after {} attempts: {}",
            target, attempts, last_error
        )))
    }

    async fn receive<T, F>(
        &self,
        link: &mut Link,
        window: Duration,
        policy: ReceivePolicy,
        cancel: &CancellationToken,
        check: &mut F,
    ) -> std::result::Result<T, Failure>
    where
        F: FnMut(&[u8]) -> Verdict<T>,
    {
        let started = Instant::now();
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];
        let mut skipped: Option<LinkError> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(Failure::Fatal(LinkError::Terminated { code: 0 }));
            }

            let before = buf.len();
            loop {
                match link.try_read(&mut chunk) {
                    Ok(Some(n)) => buf.extend_from_slice(&chunk[..n]),
                    Ok(None) => break,
                    Err(e) => {
                        return Err(Failure::Fatal(LinkError::stream(format!(
                            "receive from {} failed: {}",
                            link.target(),
                            e
                        ))))
                    },
                }
            }

            if buf.len() > before {
                self.stats.lock().bytes_received += (buf.len() - before) as u64;
                self.observer.on_receiving(&buf);
            }

            // A skipped frame may leave the next one fully buffered
            while !buf.is_empty() && (buf.len() > before || skipped.is_some()) {
                let verdict = check(&buf);
                if !matches!(verdict, Verdict::Incomplete) {
                    self.logger.frame(LogTag::Receive, &buf);
                }
                match verdict {
                    Verdict::Complete(value) => return Ok(value),
                    Verdict::Incomplete => break,
                    Verdict::Retry {
                        error,
                        frame_len: Some(len),
                    } if policy == ReceivePolicy::InPlace && len > 0 && len <= buf.len() => {
                        self.stats.lock().validation_failures += 1;
                        self.logger.exception("frame skipped", &error);
                        let _ = buf.split_to(len);
                        skipped = Some(error);
                    },
                    Verdict::Retry { error, .. } => return Err(Failure::Retry(error)),
                    Verdict::Reject(e) => return Err(Failure::Reject(e)),
                }
            }

            if started.elapsed() >= window {
                let detail = match (&skipped, buf.is_empty()) {
                    (Some(e), true) => format!("no valid frame after skipping ({})", e),
                    (_, true) => "no data".to_string(),
                    (_, false) => format!("incomplete frame ({} bytes)", buf.len()),
                };
                return Err(Failure::Timeout(LinkError::timeout(format!(
                    "{} from {} within {} ms",
                    detail,
                    link.target(),
                    window.as_millis()
                ))));
            }

            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }
}
