//! URL value type.
//!
//! Thin wrapper over [`url::Url`] that pins down the behaviors the
//! engine relies on: a parsed URL always has a scheme and a non-empty
//! host, and filename derivation falls back to `index.html` for bare
//! directory paths.

use std::fmt;
use std::str::FromStr;

use crate::error::{BoltError, Result};

/// An absolute, validated download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    inner: url::Url,
}

impl RemoteUrl {
    /// Parse an absolute URL. Fails when the scheme delimiter is absent
    /// or the host is empty. The scheme comes back lowercased.
    pub fn parse(input: &str) -> Result<Self> {
        let inner =
            url::Url::parse(input).map_err(|_| BoltError::InvalidUrl(input.to_string()))?;

        match inner.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => return Err(BoltError::InvalidUrl(input.to_string())),
        }

        Ok(Self { inner })
    }

    pub fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    /// Host component; bracketed for IPv6 literals.
    pub fn host(&self) -> &str {
        self.inner.host_str().unwrap_or_default()
    }

    /// Explicit port, or the scheme default.
    pub fn port(&self) -> Option<u16> {
        self.inner.port_or_known_default()
    }

    pub fn path(&self) -> &str {
        self.inner.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.inner.fragment()
    }

    pub fn is_secure(&self) -> bool {
        self.inner.scheme() == "https"
    }

    /// `scheme://host[:port]` without path, query or fragment.
    pub fn base(&self) -> String {
        match self.inner.port() {
            Some(port) => format!("{}://{}:{}", self.scheme(), self.host(), port),
            None => format!("{}://{}", self.scheme(), self.host()),
        }
    }

    /// Last path component, percent-decoded. Returns `index.html` when
    /// the path is empty or ends with a slash.
    pub fn filename(&self) -> String {
        let last = self
            .inner
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|s| !s.is_empty());

        match last {
            Some(name) => urlencoding::decode(name)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| name.to_string()),
            None => "index.html".to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }
}

impl fmt::Display for RemoteUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.inner.as_str())
    }
}

impl FromStr for RemoteUrl {
    type Err = BoltError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
