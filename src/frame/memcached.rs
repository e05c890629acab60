//! Memcached client for the distributed cache tier.
//!
//! Speaks the memcached text protocol over a single TCP connection:
//!
//! ```text
//! get <key>\r\n                          -> VALUE <key> <flags> <bytes>\r\n<data>\r\nEND\r\n
//!                                           END\r\n                       (miss)
//! set <key> 0 <exptime> <bytes>\r\n<data>\r\n -> STORED\r\n
//! ```
//!
//! Calls are serialized on the connection. Every call is bounded by the
//! client timeout, and the connection is dropped after any failure so the
//! next call starts from a clean socket.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use super::tiered::DistributedCache;
use crate::error::CacheError;

/// Largest value stored by default: 50MB
pub const DEFAULT_MAX_VALUE_SIZE: usize = 52_428_800;

/// Default per-call timeout
pub const DEFAULT_MEMCACHED_TIMEOUT: Duration = Duration::from_millis(1000);

/// Longest key memcached accepts
const MAX_KEY_LENGTH: usize = 250;

/// Expirations beyond this many seconds are read by memcached as unix time
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

type Connection = BufStream<TcpStream>;

/// Memcached text-protocol client.
pub struct MemcachedClient {
    address: String,
    timeout: Duration,
    max_value_size: usize,
    conn: Mutex<Option<Connection>>,
}

impl MemcachedClient {
    /// Create a client for `host:port`. No connection is made until the
    /// first call.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_MEMCACHED_TIMEOUT,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            conn: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_value_size(mut self, max_value_size: usize) -> Self {
        self.max_value_size = max_value_size;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn max_value_size(&self) -> usize {
        self.max_value_size
    }

    /// Whether `address` looks like `host:port`.
    pub fn is_valid_address(address: &str) -> bool {
        match address.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        }
    }

    /// Fetch a value. `Ok(None)` is a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        validate_key(key)?;

        let mut slot = self.conn.lock().await;
        let result = tokio::time::timeout(self.timeout, async {
            let conn = connection(&self.address, &mut slot).await?;
            do_get(conn, key, self.max_value_size).await
        })
        .await;
        self.settle(&mut slot, result)
    }

    /// Store a value for `ttl`.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        validate_key(key)?;
        if value.len() > self.max_value_size {
            return Err(CacheError::ValueTooLarge {
                size: value.len(),
                max: self.max_value_size,
            });
        }

        let exptime = expiration(ttl);
        let mut slot = self.conn.lock().await;
        let result = tokio::time::timeout(self.timeout, async {
            let conn = connection(&self.address, &mut slot).await?;
            do_set(conn, key, value, exptime).await
        })
        .await;
        self.settle(&mut slot, result)
    }

    fn settle<T>(
        &self,
        slot: &mut Option<Connection>,
        result: Result<Result<T, CacheError>, tokio::time::error::Elapsed>,
    ) -> Result<T, CacheError> {
        let result = match result {
            Ok(inner) => inner,
            Err(_) => Err(CacheError::Timeout(self.timeout.as_millis() as u64)),
        };
        if let Err(e) = &result {
            debug!(address = %self.address, error = %e, "Dropping memcached connection");
            *slot = None;
        }
        result
    }
}

#[async_trait]
impl DistributedCache for MemcachedClient {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        MemcachedClient::get(self, key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        MemcachedClient::set(self, key, &value, ttl).await
    }
}

// =============================================================================
// Protocol
// =============================================================================

async fn connection<'a>(
    address: &str,
    slot: &'a mut Option<Connection>,
) -> Result<&'a mut Connection, CacheError> {
    if slot.is_none() {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        debug!(address, "Connected to memcached");
        *slot = Some(BufStream::new(stream));
    }
    slot.as_mut()
        .ok_or_else(|| CacheError::Connection("not connected".to_string()))
}

async fn do_get(
    conn: &mut Connection,
    key: &str,
    max_value_size: usize,
) -> Result<Option<Bytes>, CacheError> {
    conn.write_all(format!("get {}\r\n", key).as_bytes()).await?;
    conn.flush().await?;

    let line = read_line(conn).await?;
    if line == "END" {
        return Ok(None);
    }

    let mut parts = line.split(' ');
    if parts.next() != Some("VALUE") {
        return Err(unexpected_reply(&line));
    }
    let len: usize = parts
        .nth(2)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| CacheError::Protocol(format!("malformed VALUE line: {}", line)))?;
    if len > max_value_size {
        return Err(CacheError::ValueTooLarge {
            size: len,
            max: max_value_size,
        });
    }

    let mut data = vec![0u8; len + 2];
    conn.read_exact(&mut data).await?;
    if !data.ends_with(b"\r\n") {
        return Err(CacheError::Protocol("value not terminated by CRLF".to_string()));
    }
    data.truncate(len);

    let end = read_line(conn).await?;
    if end != "END" {
        return Err(unexpected_reply(&end));
    }
    Ok(Some(Bytes::from(data)))
}

async fn do_set(
    conn: &mut Connection,
    key: &str,
    value: &[u8],
    exptime: u64,
) -> Result<(), CacheError> {
    let command = format!("set {} 0 {} {}\r\n", key, exptime, value.len());
    conn.write_all(command.as_bytes()).await?;
    conn.write_all(value).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;

    let line = read_line(conn).await?;
    if line == "STORED" {
        Ok(())
    } else {
        Err(unexpected_reply(&line))
    }
}

async fn read_line(conn: &mut Connection) -> Result<String, CacheError> {
    let mut line = String::new();
    if conn.read_line(&mut line).await? == 0 {
        return Err(CacheError::Connection(
            "connection closed by server".to_string(),
        ));
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}

fn unexpected_reply(line: &str) -> CacheError {
    CacheError::Protocol(format!("unexpected reply: {}", line))
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "key length {} outside 1..={}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(CacheError::InvalidKey(format!(
            "key contains whitespace or control characters: {:?}",
            key
        )));
    }
    Ok(())
}

/// Memcached expiration field for `ttl`.
fn expiration(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if secs <= MAX_RELATIVE_EXPIRATION {
        return secs;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    now + secs
}
