//! Endpoint addresses
//!
//! Accepts `redis://[[user]:password@]host[:port][/db]` and bare
//! `host[:port]`.

use std::fmt;
use std::str::FromStr;

use crate::error::{ChunkError, Result};

pub const DEFAULT_PORT: u16 = 6379;

/// Where and how to reach one store node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: u32,
}

impl Endpoint {
    /// `host:port`, bracketing IPv6 hosts
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Same credentials and database on another node
    pub fn with_node(&self, host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..self.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.db)
    }
}

impl FromStr for Endpoint {
    type Err = ChunkError;

    fn from_str(input: &str) -> Result<Self> {
        let invalid = |why: &str| ChunkError::Config(format!("invalid endpoint '{}': {}", input, why));

        if input.starts_with("rediss://") {
            return Err(invalid("TLS endpoints are not supported"));
        }
        let rest = input.strip_prefix("redis://").unwrap_or(input);

        let (userinfo, rest) = match rest.rsplit_once('@') {
            Some((userinfo, rest)) => (Some(userinfo), rest),
            None => (None, rest),
        };
        let (username, password) = match userinfo {
            None => (None, None),
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (
                    (!user.is_empty()).then(|| user.to_string()),
                    Some(pass.to_string()),
                ),
                None => (None, Some(info.to_string())),
            },
        };

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };
        let db = if path.is_empty() {
            0
        } else {
            path.parse().map_err(|_| invalid("database must be a number"))?
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unclosed IPv6 bracket"))?;
            let port = match after.strip_prefix(':') {
                Some(port) => port.parse().map_err(|_| invalid("bad port"))?,
                None if after.is_empty() => DEFAULT_PORT,
                None => return Err(invalid("unexpected text after IPv6 host")),
            };
            (host.to_string(), port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (
                    host.to_string(),
                    port.parse().map_err(|_| invalid("bad port"))?,
                ),
                None => (authority.to_string(), DEFAULT_PORT),
            }
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            host,
            port,
            username,
            password,
            db,
        })
    }
}
