//! Command definitions
//!
//! The subset of store commands used by chunkline, and their RESP request
//! frames.

use bytes::Bytes;
use redis_protocol::resp2::types::BytesFrame;

/// A request to the store
#[derive(Debug, Clone)]
pub enum Command<'a> {
    /// Health check
    Ping,

    /// Authenticate the connection
    Auth {
        username: Option<&'a str>,
        password: &'a str,
    },

    /// Switch logical database
    Select { db: u32 },

    /// Store one value
    Set { key: &'a str, value: Bytes },

    /// Fetch many values in one call
    MGet { keys: &'a [String] },

    /// One page of a cursor-based key-pattern scan
    Scan {
        cursor: u64,
        pattern: &'a str,
        count: usize,
    },

    /// Remove keys
    Del { keys: &'a [String] },

    /// Slot-to-node map of a cluster
    ClusterSlots,
}

impl Command<'_> {
    /// Command name as sent on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Auth { .. } => "AUTH",
            Command::Select { .. } => "SELECT",
            Command::Set { .. } => "SET",
            Command::MGet { .. } => "MGET",
            Command::Scan { .. } => "SCAN",
            Command::Del { .. } => "DEL",
            Command::ClusterSlots => "CLUSTER",
        }
    }

    /// Encode as a RESP array of bulk strings
    pub fn to_frame(&self) -> BytesFrame {
        let mut parts = vec![bulk_static(self.name())];

        match self {
            Command::Ping => {}
            Command::Auth { username, password } => {
                if let Some(user) = username {
                    parts.push(bulk(user));
                }
                parts.push(bulk(password));
            }
            Command::Select { db } => parts.push(bulk(&db.to_string())),
            Command::Set { key, value } => {
                parts.push(bulk(key));
                parts.push(BytesFrame::BulkString(value.clone()));
            }
            Command::MGet { keys } | Command::Del { keys } => {
                parts.extend(keys.iter().map(|k| bulk(k)));
            }
            Command::Scan {
                cursor,
                pattern,
                count,
            } => {
                parts.push(bulk(&cursor.to_string()));
                parts.push(bulk_static("MATCH"));
                parts.push(bulk(pattern));
                parts.push(bulk_static("COUNT"));
                parts.push(bulk(&count.to_string()));
            }
            Command::ClusterSlots => parts.push(bulk_static("SLOTS")),
        }

        BytesFrame::Array(parts)
    }
}

fn bulk(value: &str) -> BytesFrame {
    BytesFrame::BulkString(Bytes::copy_from_slice(value.as_bytes()))
}

fn bulk_static(value: &'static str) -> BytesFrame {
    BytesFrame::BulkString(Bytes::from_static(value.as_bytes()))
}
