use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyConfigError {
    #[error("proxy pool is empty")]
    EmptyPool,
    #[error("proxy entry {index} is malformed: expected host:port:user:pass[:label]")]
    Malformed { index: usize },
    #[error("proxy entry {index} has an invalid port `{port}`")]
    InvalidPort { index: usize, port: String },
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProxyCredential {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub label: String,
}

impl ProxyCredential {
    /// Proxy URL without credentials; auth is attached separately.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Parses `host:port:user:pass[:label]`. `index` is zero-based.
    pub fn parse(entry: &str, index: usize) -> Result<Self, ProxyConfigError> {
        let parts: Vec<&str> = entry.trim().splitn(5, ':').collect();
        if parts.len() < 4 || parts.iter().take(4).any(|part| part.trim().is_empty()) {
            return Err(ProxyConfigError::Malformed { index });
        }
        let port = parts[1]
            .trim()
            .parse::<u16>()
            .map_err(|_| ProxyConfigError::InvalidPort {
                index,
                port: parts[1].to_string(),
            })?;
        let label = parts
            .get(4)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("proxy-{}", index + 1));
        Ok(Self {
            host: parts[0].trim().to_string(),
            port,
            username: parts[2].trim().to_string(),
            password: parts[3].trim().to_string(),
            label,
        })
    }
}

impl fmt::Debug for ProxyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("label", &self.label)
            .finish()
    }
}

impl fmt::Display for ProxyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Splits a pool definition on commas and newlines. Blank entries are ignored.
pub fn parse_pool(raw: &str) -> Result<Vec<ProxyCredential>, ProxyConfigError> {
    let pool = raw
        .split([',', '\n'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(index, entry)| ProxyCredential::parse(entry, index))
        .collect::<Result<Vec<_>, _>>()?;
    if pool.is_empty() {
        return Err(ProxyConfigError::EmptyPool);
    }
    Ok(pool)
}

/// Round-robin cursor over a fixed proxy pool.
pub struct ProxyRotator {
    pool: Arc<[ProxyCredential]>,
    cursor: AtomicUsize,
}

impl ProxyRotator {
    pub fn new(pool: Vec<ProxyCredential>) -> Result<Self, ProxyConfigError> {
        if pool.is_empty() {
            return Err(ProxyConfigError::EmptyPool);
        }
        Ok(Self {
            pool: pool.into(),
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn next(&self) -> &ProxyCredential {
        let len = self.pool.len();
        let index = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some((current + 1) % len)
            })
            .unwrap_or(0);
        &self.pool[index]
    }

    pub fn pool(&self) -> &[ProxyCredential] {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }
}
