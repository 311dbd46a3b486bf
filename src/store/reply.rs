//! Reply decoding
//!
//! Turns RESP reply frames into typed results. Error replies become
//! `ChunkError::Backend`; any other unexpected shape is a
//! `ChunkError::Protocol`.

use bytes::Bytes;
use redis_protocol::resp2::types::BytesFrame;

use crate::error::{ChunkError, Result};

/// One slot range of a `CLUSTER SLOTS` reply, primary node only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub host: String,
    pub port: u16,
}

/// Split error replies from data replies
pub fn into_result(frame: BytesFrame) -> Result<BytesFrame> {
    match frame {
        BytesFrame::Error(message) => Err(ChunkError::Backend(message.to_string())),
        other => Ok(other),
    }
}

/// `+OK`
pub fn expect_ok(frame: BytesFrame, command: &str) -> Result<()> {
    match frame {
        BytesFrame::SimpleString(s) if s.as_ref() == b"OK" => Ok(()),
        other => Err(unexpected(command, &other)),
    }
}

/// `+PONG`
pub fn expect_pong(frame: BytesFrame) -> Result<()> {
    match frame {
        BytesFrame::SimpleString(s) | BytesFrame::BulkString(s) if s.as_ref() == b"PONG" => Ok(()),
        other => Err(unexpected("PING", &other)),
    }
}

/// `:N`
pub fn expect_integer(frame: BytesFrame, command: &str) -> Result<i64> {
    match frame {
        BytesFrame::Integer(n) => Ok(n),
        other => Err(unexpected(command, &other)),
    }
}

/// Multi-get reply: exactly `expected` bulk strings or nulls
pub fn expect_values(frame: BytesFrame, expected: usize) -> Result<Vec<Option<Bytes>>> {
    let items = match frame {
        BytesFrame::Array(items) => items,
        other => return Err(unexpected("MGET", &other)),
    };
    if items.len() != expected {
        return Err(ChunkError::Protocol(format!(
            "MGET returned {} values for {} keys",
            items.len(),
            expected
        )));
    }

    items
        .into_iter()
        .map(|item| match item {
            BytesFrame::Null => Ok(None),
            BytesFrame::BulkString(value) => Ok(Some(value)),
            other => Err(unexpected("MGET", &other)),
        })
        .collect()
}

/// Scan reply: `[cursor, [key, ...]]`
pub fn expect_scan(frame: BytesFrame) -> Result<(u64, Vec<String>)> {
    let mut items = match frame {
        BytesFrame::Array(items) if items.len() == 2 => items,
        other => return Err(unexpected("SCAN", &other)),
    };
    let keys = items.pop();
    let cursor = items.pop();

    let cursor = match cursor {
        Some(BytesFrame::BulkString(raw)) | Some(BytesFrame::SimpleString(raw)) => {
            parse_text::<u64>(&raw, "SCAN cursor")?
        }
        other => {
            return Err(ChunkError::Protocol(format!(
                "SCAN cursor has unexpected shape {:?}",
                other
            )))
        }
    };

    let keys = match keys {
        Some(BytesFrame::Array(keys)) => keys
            .into_iter()
            .map(|key| match key {
                BytesFrame::BulkString(raw) | BytesFrame::SimpleString(raw) => {
                    String::from_utf8(raw.to_vec())
                        .map_err(|e| ChunkError::Protocol(format!("SCAN key is not UTF-8: {}", e)))
                }
                other => Err(unexpected("SCAN", &other)),
            })
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(ChunkError::Protocol(format!(
                "SCAN keys have unexpected shape {:?}",
                other
            )))
        }
    };

    Ok((cursor, keys))
}

/// `CLUSTER SLOTS` reply, keeping the primary of every range
pub fn expect_slots(frame: BytesFrame) -> Result<Vec<SlotRange>> {
    let entries = match frame {
        BytesFrame::Array(entries) => entries,
        other => return Err(unexpected("CLUSTER SLOTS", &other)),
    };

    entries
        .into_iter()
        .map(|entry| {
            let mut fields = match entry {
                BytesFrame::Array(fields) if fields.len() >= 3 => fields.into_iter(),
                other => return Err(unexpected("CLUSTER SLOTS", &other)),
            };
            let start = slot_bound(fields.next())?;
            let end = slot_bound(fields.next())?;
            let node = match fields.next() {
                Some(BytesFrame::Array(node)) if node.len() >= 2 => node,
                other => {
                    return Err(ChunkError::Protocol(format!(
                        "CLUSTER SLOTS node has unexpected shape {:?}",
                        other
                    )))
                }
            };
            let host = match &node[0] {
                BytesFrame::BulkString(raw) | BytesFrame::SimpleString(raw) => {
                    String::from_utf8_lossy(raw).into_owned()
                }
                other => return Err(unexpected("CLUSTER SLOTS", other)),
            };
            let port = match &node[1] {
                BytesFrame::Integer(port) => u16::try_from(*port).map_err(|_| {
                    ChunkError::Protocol(format!("CLUSTER SLOTS port {} out of range", port))
                })?,
                other => return Err(unexpected("CLUSTER SLOTS", other)),
            };
            Ok(SlotRange {
                start,
                end,
                host,
                port,
            })
        })
        .collect()
}

fn slot_bound(frame: Option<BytesFrame>) -> Result<u16> {
    match frame {
        Some(BytesFrame::Integer(n)) => u16::try_from(n)
            .map_err(|_| ChunkError::Protocol(format!("slot {} out of range", n))),
        other => Err(ChunkError::Protocol(format!(
            "CLUSTER SLOTS bound has unexpected shape {:?}",
            other
        ))),
    }
}

fn parse_text<T: std::str::FromStr>(raw: &[u8], what: &str) -> Result<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            ChunkError::Protocol(format!(
                "{} is not a number: {:?}",
                what,
                String::from_utf8_lossy(raw)
            ))
        })
}

fn unexpected(command: &str, frame: &BytesFrame) -> ChunkError {
    ChunkError::Protocol(format!("unexpected {} reply: {:?}", command, frame))
}
