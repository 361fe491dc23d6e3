use std::error::Error;
use std::fmt;

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer,
};

pub type DynError = Box<dyn Error + 'static>;
pub type BenchResult<T> = Result<T, DynError>;

/// # Metrics Error
///
/// Failures of the metrics collection path. Anything not covered here (missing labels,
/// clients without samples, degenerate numeric input) is soft missing data and never
/// surfaces as an error.
#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    /// No usable time-series source was configured.
    #[error("metrics source is not configured: {0}")]
    Configuration(String),
    /// Transport failure or malformed response from the time-series source.
    #[error("metrics query failed: {0}")]
    Query(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

impl From<hyper::Error> for MetricsError {
    fn from(err: hyper::Error) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<std::io::Error> for MetricsError {
    fn from(err: std::io::Error) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<json::Error> for MetricsError {
    fn from(err: json::Error) -> Self {
        Self::Query(format!("malformed response: {err}"))
    }
}

#[derive(Clone, Debug)]
pub struct Url(pub hyper::Uri);

impl Url {
    /// `host:port` pair suitable for opening a TCP connection, falling back to the
    /// scheme's well-known port.
    pub fn address(&self) -> String {
        let port = self.0.port_u16().unwrap_or_else(|| match self.0.scheme_str() {
            Some("https") => 443,
            _ => 80,
        });
        format!("{}:{}", self.host(), port)
    }

    pub fn host(&self) -> &str {
        self.0.host().unwrap_or("localhost")
    }

    /// Base path without a trailing slash, so endpoint paths can be appended.
    pub fn base_path(&self) -> &str {
        self.0.path().trim_end_matches('/')
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for Url {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct UrlVisitor;

        impl Visitor<'_> for UrlVisitor {
            type Value = Url;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a valid URI string with a host")
            }

            fn visit_str<E>(self, value: &str) -> Result<Url, E>
            where
                E: de::Error,
            {
                let uri = value.parse::<hyper::Uri>().map_err(de::Error::custom)?;
                if uri.host().is_none() {
                    return Err(de::Error::custom("uri has no host"));
                }
                Ok(Url(uri))
            }
        }

        deserializer.deserialize_str(UrlVisitor)
    }
}
