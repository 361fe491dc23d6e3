use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    consts::{DEFAULT_SAMPLE_INTERVAL, MIN_SAMPLE_INTERVAL},
    types::{BenchResult, Url},
};

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub run: RunSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub sampler: SamplerSettings,
}

impl Config {
    pub fn from_path(path: PathBuf) -> BenchResult<Self> {
        let config = std::fs::read_to_string(path)?;
        Self::from_toml(&config)
    }

    pub fn from_toml(config: &str) -> BenchResult<Self> {
        let config: Self = toml::from_str(config)?;
        if config.sampler.interval < MIN_SAMPLE_INTERVAL {
            return Err(format!(
                "sampler interval must be at least {MIN_SAMPLE_INTERVAL:?}, got {:?}",
                config.sampler.interval
            )
            .into());
        }
        Ok(config)
    }

    pub fn from_args() -> BenchResult<Self> {
        let path = std::env::args()
            .nth(1)
            .ok_or("usage: rpcbench config.toml")?
            .into();
        Self::from_path(path)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct RunSettings {
    /// Value of the run identity label shared by every sample of this run.
    pub id: String,
    /// Clients expected in the output, even if the backend has no samples for them.
    pub clients: Vec<String>,
    #[serde(deserialize_with = "duration::deserialize_duration")]
    pub duration: Duration,
    /// Optional raw per-request latencies: `{client: {method: [ms, ...]}}`.
    #[serde(default)]
    pub latencies: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub struct MetricsSettings {
    #[serde(default, skip_serializing)]
    pub source: Option<SourceSettings>,
    #[serde(default)]
    pub labels: LabelSettings,
    #[serde(default)]
    pub families: FamilySettings,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct SourceSettings {
    /// Base URL of a Prometheus compatible query API.
    pub url: Url,
}

/// Label keys carried by every sample of the time-series backend.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", default)]
pub struct LabelSettings {
    pub run: String,
    pub client: String,
    pub method: String,
    pub error_code: String,
    pub status: String,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            run: "testid".into(),
            client: "client".into(),
            method: "method".into(),
            error_code: "error_code".into(),
            status: "status".into(),
        }
    }
}

/// Metric family names. Duration families are reported as `<family>_<indicator>`.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", default)]
pub struct FamilySettings {
    pub duration: String,
    pub requests: String,
    pub connecting: String,
    pub tls_handshaking: String,
    pub waiting: String,
}

impl Default for FamilySettings {
    fn default() -> Self {
        Self {
            duration: "k6_http_req_duration".into(),
            requests: "k6_http_reqs_total".into(),
            connecting: "k6_http_req_connecting".into(),
            tls_handshaking: "k6_http_req_tls_handshaking".into(),
            waiting: "k6_http_req_waiting".into(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct SamplerSettings {
    #[serde(deserialize_with = "duration::deserialize_duration")]
    pub interval: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}
