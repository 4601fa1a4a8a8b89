//! Blocking TCP transport to a collector.

use crate::error::DeliveryError;
use crate::protocol::{self, ResultCode};
use bytes::BytesMut;
use quill_core::config::ScribeConfig;
use std::io::{Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// An open session able to submit one entry at a time.
pub trait Connection: Send {
    fn log(&mut self, category: &str, message: &str) -> Result<ResultCode, DeliveryError>;

    /// False once the transport has failed or been closed.
    fn is_open(&self) -> bool;

    /// Release the transport. Never fails; safe to call repeatedly.
    fn close(&mut self);
}

/// Opens connections to one fixed endpoint.
pub trait Connector: Send + Sync {
    type Conn: Connection;

    fn connect(&self) -> Result<Self::Conn, DeliveryError>;

    /// `host:port` used in diagnostics.
    fn endpoint(&self) -> String;
}

// ── TCP connector ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    pub fn from_config(config: &ScribeConfig) -> Self {
        Self {
            host: config.remote_host.clone(),
            port: config.remote_port,
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn open(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        // A zero timeout is rejected by the socket calls; treat it as unset.
        let io_timeout = self.io_timeout.filter(|t| !t.is_zero());
        let stream = match self.connect_timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(io_timeout)?;
        stream.set_write_timeout(io_timeout)?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}

impl Connector for TcpConnector {
    type Conn = FramedConnection;

    fn connect(&self) -> Result<FramedConnection, DeliveryError> {
        let candidates = resolve_addrs(&self.host, self.port);
        if candidates.is_empty() {
            return Err(DeliveryError::Resolve {
                addr: self.endpoint(),
            });
        }

        let mut last_err = None;
        for addr in &candidates {
            match self.open(*addr) {
                Ok(stream) => {
                    debug!(endpoint = %self.endpoint(), resolved = %addr, "Collector connected");
                    return Ok(FramedConnection::new(stream));
                }
                Err(e) => {
                    debug!(endpoint = %self.endpoint(), resolved = %addr, error = %e, "Collector connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(DeliveryError::Connect {
            addr: self.endpoint(),
            source: last_err
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses")),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolve `host` to socket addresses, IPv4 before IPv6.
fn resolve_addrs(host: &str, port: u16) -> Vec<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return vec![SocketAddr::new(ip, port)];
    }
    let all: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
        Ok(iter) => iter.collect(),
        Err(_) => return vec![],
    };
    let mut v4: Vec<SocketAddr> = all.iter().copied().filter(|a| a.is_ipv4()).collect();
    v4.extend(all.iter().copied().filter(|a| a.is_ipv6()));
    v4
}

// ── Framed connection ────────────────────────────────────────────

/// One TCP stream speaking the framed binary protocol.
pub struct FramedConnection {
    stream: Option<TcpStream>,
    seq_id: i32,
    buf: BytesMut,
}

impl FramedConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
            seq_id: 0,
            buf: BytesMut::with_capacity(512),
        }
    }

    fn round_trip(&mut self, category: &str, message: &str) -> Result<ResultCode, DeliveryError> {
        let stream = self.stream.as_mut().ok_or(DeliveryError::NotConnected)?;
        protocol::encode_log_call(&mut self.buf, self.seq_id.wrapping_add(1), category, message)?;
        self.seq_id = self.seq_id.wrapping_add(1);
        stream.write_all(&self.buf)?;
        stream.flush()?;

        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix)?;
        let len = protocol::frame_len(prefix)?;
        let mut frame = vec![0u8; len];
        stream.read_exact(&mut frame)?;
        protocol::decode_log_reply(&frame, self.seq_id)
    }
}

impl Connection for FramedConnection {
    fn log(&mut self, category: &str, message: &str) -> Result<ResultCode, DeliveryError> {
        let result = self.round_trip(category, message);
        if result.as_ref().is_err_and(DeliveryError::closes_connection) {
            // The stream is out of step with the collector; never reuse it.
            self.close();
        }
        result
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for FramedConnection {
    fn drop(&mut self) {
        self.close();
    }
}
