//! Mock field devices for integration tests
//!
//! A device is a request splitter (how long is the next complete request)
//! plus a handler returning the frames to send back, each after an optional
//! delay.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::sleep;

use field_comlink::bytes::{CR, EOT, LF};

/// Length of the first complete request in `buf`
pub type Splitter = fn(&[u8]) -> Option<usize>;

/// Reply frames for one request
pub type Handler = Arc<dyn Fn(&[u8]) -> Vec<Reply> + Send + Sync>;

pub fn handler(f: impl Fn(&[u8]) -> Vec<Reply> + Send + Sync + 'static) -> Handler {
    Arc::new(f)
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub delay: Duration,
    pub frame: Vec<u8>,
}

impl Reply {
    pub fn now(frame: Vec<u8>) -> Self {
        Self {
            delay: Duration::ZERO,
            frame,
        }
    }

    pub fn after(ms: u64, frame: Vec<u8>) -> Self {
        Self {
            delay: Duration::from_millis(ms),
            frame,
        }
    }
}

/// Requests seen by a mock device
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Vec<u8>>>>);

impl Journal {
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    fn push(&self, request: &[u8]) {
        self.0.lock().push(request.to_vec());
    }
}

// ============================================================================
// Splitters
// ============================================================================

pub fn melsec_split(buf: &[u8]) -> Option<usize> {
    if buf.len() < 13 {
        return None;
    }
    let total = 13 + u16::from_le_bytes([buf[11], buf[12]]) as usize;
    (buf.len() >= total).then_some(total)
}

/// EOT, plus two BCC characters when the command letter is lowercase
pub fn masterk_split(buf: &[u8]) -> Option<usize> {
    let eot = buf.iter().position(|&b| b == EOT)?;
    let bcc = buf.get(3).is_some_and(|c| c.is_ascii_lowercase());
    let total = if bcc { eot + 3 } else { eot + 1 };
    (buf.len() >= total).then_some(total)
}

pub fn temi_split(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == [CR, LF]).map(|p| p + 2)
}

// ============================================================================
// Devices
// ============================================================================

/// TCP device on an ephemeral port
pub async fn tcp_device(split: Splitter, handler: Handler) -> (SocketAddr, Journal) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let journal = serve_tcp(listener, split, handler);
    (addr, journal)
}

/// Serve an already bound listener
pub fn serve_tcp(listener: TcpListener, split: Splitter, handler: Handler) -> Journal {
    let journal = Journal::default();
    let seen = journal.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle_tcp(stream, split, handler.clone(), seen.clone()));
        }
    });
    journal
}

async fn handle_tcp(mut stream: TcpStream, split: Splitter, handler: Handler, journal: Journal) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        while let Some(len) = split(&buf) {
            let request: Vec<u8> = buf.drain(..len).collect();
            journal.push(&request);
            for reply in handler(&request) {
                if !reply.delay.is_zero() {
                    sleep(reply.delay).await;
                }
                if stream.write_all(&reply.frame).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// TCP listener that accepts and never answers
pub async fn silent_tcp_device(listener: TcpListener) -> Journal {
    serve_tcp(listener, |buf| (!buf.is_empty()).then_some(buf.len()), handler(|_| Vec::new()))
}

/// UDP device on an ephemeral port; one datagram is one request
pub async fn udp_device(handler: Handler) -> (SocketAddr, Journal) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let journal = Journal::default();
    let seen = journal.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            seen.push(&buf[..n]);
            for reply in handler(&buf[..n]) {
                if !reply.delay.is_zero() {
                    sleep(reply.delay).await;
                }
                let _ = socket.send_to(&reply.frame, from).await;
            }
        }
    });
    (addr, journal)
}

// ============================================================================
// Ports
// ============================================================================

/// `n` consecutive free ports, nothing listening
pub async fn refusing_ports(n: u16) -> u16 {
    loop {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = probe.local_addr().unwrap().port();
        drop(probe);
        if base.checked_add(n).is_none() {
            continue;
        }
        let mut free = true;
        for i in 1..n {
            if TcpListener::bind(("127.0.0.1", base + i)).await.is_err() {
                free = false;
                break;
            }
        }
        if free {
            return base;
        }
    }
}

/// `n` listeners on consecutive ports
pub async fn consecutive_listeners(n: u16) -> Vec<TcpListener> {
    'retry: loop {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = first.local_addr().unwrap().port();
        if base.checked_add(n).is_none() {
            continue;
        }
        let mut listeners = vec![first];
        for i in 1..n {
            match TcpListener::bind(("127.0.0.1", base + i)).await {
                Ok(listener) => listeners.push(listener),
                Err(_) => continue 'retry,
            }
        }
        return listeners;
    }
}

/// Poll `check` every 10 ms until it holds or `ms` elapsed
pub async fn eventually(ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}
