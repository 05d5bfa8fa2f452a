//! Migration targets.

use std::fmt;

use ferry_core::Result;

use crate::dialect::Dialect;

/// One database to migrate, identified by its connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: String,
}

impl Target {
    /// Creates a target from a connection URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Returns the raw connection URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the dialect selected by the URL scheme.
    pub fn dialect(&self) -> Result<Dialect> {
        Dialect::from_url(&self.url)
    }

    /// Returns the URL with any password replaced by `***`, for logs and reports.
    pub fn display_name(&self) -> String {
        redact(&self.url)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

fn redact(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &url[authority_start..];
    let authority = &rest[..rest.find(['/', '?']).unwrap_or(rest.len())];

    let Some(at) = authority.rfind('@') else {
        return url.to_string();
    };
    let Some(colon) = authority[..at].find(':') else {
        return url.to_string();
    };

    format!(
        "{}{}:***{}",
        &url[..authority_start],
        &authority[..colon],
        &rest[at..]
    )
}
