//! RESP client
//!
//! Talks RESP2 to a single endpoint (standalone server or cluster proxy).
//!
//! ## Connection Pool
//! - Fixed number of slots, each holding at most one framed TCP connection
//! - Calls pick a slot round-robin and hold it for one request/reply exchange
//! - Slots dial lazily; a connection is taken out of its slot for the
//!   exchange and put back only after a clean reply, so a transport failure
//!   or a cancelled call leaves the slot empty and the next call re-dials
//!
//! At most `pool_size` requests are outstanding against the endpoint at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::config::Config;
use crate::error::{ChunkError, Result};

use super::command::Command;
use super::endpoint::Endpoint;
use super::reply;
use super::{KvStore, ScanCursor, ScanPage};

type Connection = Framed<TcpStream, Resp2>;

/// Pooled RESP2 client for one endpoint
pub struct RespStore {
    /// Node address and credentials
    endpoint: Endpoint,

    /// Pool slots (None = not connected yet, or dropped after a failure)
    slots: Vec<Mutex<Option<Connection>>>,

    /// Round-robin slot cursor
    next_slot: AtomicUsize,

    connect_timeout: Duration,

    io_timeout: Option<Duration>,
}

impl RespStore {
    /// Create a client without dialling
    pub fn new(
        endpoint: Endpoint,
        pool_size: usize,
        connect_timeout: Duration,
        io_timeout: Option<Duration>,
    ) -> Self {
        let slots = (0..pool_size.max(1)).map(|_| Mutex::new(None)).collect();
        Self {
            endpoint,
            slots,
            next_slot: AtomicUsize::new(0),
            connect_timeout,
            io_timeout,
        }
    }

    /// Create a client from config and verify the endpoint answers PING
    pub async fn connect(config: &Config) -> Result<Self> {
        let endpoint: Endpoint = config.endpoint.parse()?;
        let store = Self::new(
            endpoint,
            config.max_connections,
            config.connect_timeout(),
            config.io_timeout(),
        );
        store.verify().await?;
        Ok(store)
    }

    /// PING once, reporting any failure as a connection error
    pub async fn verify(&self) -> Result<()> {
        match self.ping().await {
            Ok(()) => {
                tracing::info!("Connected to {}", self.endpoint);
                Ok(())
            }
            Err(err @ ChunkError::Connection { .. }) => Err(err),
            Err(err) => Err(ChunkError::connection(self.endpoint.addr(), err)),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send one command and wait for its reply
    ///
    /// Error replies come back as `ChunkError::Backend` and leave the
    /// connection in place; transport failures drop it.
    pub async fn call(&self, command: Command<'_>) -> Result<BytesFrame> {
        let index = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = self.slots[index].lock().await;

        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.dial().await?,
        };

        match self.exchange(&mut conn, command.to_frame()).await {
            Ok(frame) => {
                *slot = Some(conn);
                reply::into_result(frame)
            }
            Err(err) => {
                tracing::debug!(
                    "Dropping connection {} to {} after {} failed: {}",
                    index,
                    self.endpoint.addr(),
                    command.name(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Open a connection and run the AUTH/SELECT handshake
    async fn dial(&self) -> Result<Connection> {
        let addr = self.endpoint.addr();
        let socket = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ChunkError::connection(&addr, "connect timed out"))?
            .map_err(|e| ChunkError::connection(&addr, e))?;
        socket.set_nodelay(true).ok();

        let mut conn = Framed::new(socket, Resp2::default());

        if let Some(password) = self.endpoint.password.as_deref() {
            let auth = Command::Auth {
                username: self.endpoint.username.as_deref(),
                password,
            };
            self.handshake(&mut conn, auth).await?;
        }
        if self.endpoint.db != 0 {
            self.handshake(&mut conn, Command::Select { db: self.endpoint.db })
                .await?;
        }

        tracing::debug!("Opened connection to {}", addr);
        Ok(conn)
    }

    async fn handshake(&self, conn: &mut Connection, command: Command<'_>) -> Result<()> {
        let name = command.name();
        let frame = self
            .exchange(conn, command.to_frame())
            .await
            .and_then(reply::into_result)
            .and_then(|frame| reply::expect_ok(frame, name));
        frame.map_err(|e| ChunkError::connection(self.endpoint.addr(), format!("{} failed: {}", name, e)))
    }

    async fn exchange(&self, conn: &mut Connection, frame: BytesFrame) -> Result<BytesFrame> {
        let roundtrip = async {
            conn.send(frame)
                .await
                .map_err(|e| ChunkError::Protocol(e.to_string()))?;
            match conn.next().await {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(e)) => Err(ChunkError::Protocol(e.to_string())),
                None => Err(ChunkError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} closed the connection", self.endpoint.addr()),
                ))),
            }
        };

        match self.io_timeout {
            Some(limit) => timeout(limit, roundtrip).await.map_err(|_| {
                ChunkError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no reply from {} within {:?}", self.endpoint.addr(), limit),
                ))
            })?,
            None => roundtrip.await,
        }
    }
}

#[async_trait]
impl KvStore for RespStore {
    async fn ping(&self) -> Result<()> {
        reply::expect_pong(self.call(Command::Ping).await?)
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let frame = self.call(Command::Set { key, value }).await?;
        reply::expect_ok(frame, "SET")
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let frame = self.call(Command::MGet { keys }).await?;
        reply::expect_values(frame, keys.len())
    }

    async fn scan(&self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage> {
        let frame = self
            .call(Command::Scan {
                cursor: cursor.position,
                pattern,
                count,
            })
            .await?;
        let (next, keys) = reply::expect_scan(frame)?;
        Ok(ScanPage {
            cursor: ScanCursor::at(0, next),
            keys,
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = reply::expect_integer(self.call(Command::Del { keys }).await?, "DEL")?;
        Ok(removed.max(0) as u64)
    }
}
