//! Schema-checked conversion of raw backend series into typed samples.

use rpcbench_core::config::{FamilySettings, LabelSettings};
use rpcbench_core::metrics::Indicator;

use crate::source::RawSample;

const NAME_LABEL: &str = "__name__";
const INDICATORS: &str = "avg|min|med|max|p90|p95|p99";
const REGEX_META: &str = r"\.+*?()|[]{}^$";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Connecting,
    TlsHandshaking,
    Waiting,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SampleKind {
    /// One latency indicator of the request duration family, in seconds.
    Duration(Indicator),
    /// Request counter, split by the optional error code and status labels.
    Requests {
        error_code: Option<String>,
        status: Option<String>,
    },
    /// Mean duration of one connection phase, in seconds.
    Connection(Phase),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub client: String,
    pub method: String,
    pub kind: SampleKind,
    pub value: f64,
}

/// # Sample Schema
///
/// Label and family names of one run, used both to build the backend selector and to
/// validate every returned series.
pub struct SampleSchema<'a> {
    pub run_id: &'a str,
    pub labels: &'a LabelSettings,
    pub families: &'a FamilySettings,
}

impl SampleSchema<'_> {
    /// Instant-vector selector matching every family of interest for this run.
    pub fn selector(&self) -> String {
        let f = self.families;
        let pattern = format!(
            "{}_({INDICATORS})|{}|{}_avg|{}_avg|{}_avg",
            regex_escape(&f.duration),
            regex_escape(&f.requests),
            regex_escape(&f.connecting),
            regex_escape(&f.tls_handshaking),
            regex_escape(&f.waiting),
        );
        format!(
            r#"{{{NAME_LABEL}=~"{}",{}="{}"}}"#,
            escape(&pattern),
            self.labels.run,
            escape(self.run_id),
        )
    }

    /// Validates one raw series. Anything without the required labels, from another
    /// run, of an unknown family or with a negative value is rejected.
    pub fn decode(&self, raw: &RawSample) -> Option<Sample> {
        let label = |key: &str| raw.labels.get(key).filter(|v| !v.is_empty());

        if label(&self.labels.run)? != self.run_id {
            return None;
        }
        let name = label(NAME_LABEL)?;
        let client = label(&self.labels.client)?;
        let method = label(&self.labels.method)?;
        if raw.value < 0.0 || !raw.value.is_finite() {
            return None;
        }
        let kind = self.classify(name, || SampleKind::Requests {
            error_code: label(&self.labels.error_code).cloned(),
            status: label(&self.labels.status).cloned(),
        })?;

        Some(Sample {
            client: client.clone(),
            method: method.clone(),
            kind,
            value: raw.value,
        })
    }

    fn classify(&self, name: &str, requests: impl FnOnce() -> SampleKind) -> Option<SampleKind> {
        let f = self.families;
        if name == f.requests {
            return Some(requests());
        }
        if let Some(suffix) = family_suffix(name, &f.duration) {
            return Indicator::from_suffix(suffix).map(SampleKind::Duration);
        }
        let phases = [
            (&f.connecting, Phase::Connecting),
            (&f.tls_handshaking, Phase::TlsHandshaking),
            (&f.waiting, Phase::Waiting),
        ];
        phases
            .into_iter()
            .find(|(family, _)| family_suffix(name, family) == Some("avg"))
            .map(|(_, phase)| SampleKind::Connection(phase))
    }
}

fn family_suffix<'n>(name: &'n str, family: &str) -> Option<&'n str> {
    name.strip_prefix(family)?.strip_prefix('_')
}

/// Escapes RE2 metacharacters so a family name only matches itself.
fn regex_escape(value: &str) -> String {
    value.chars().fold(String::with_capacity(value.len()), |mut out, c| {
        if REGEX_META.contains(c) {
            out.push('\\');
        }
        out.push(c);
        out
    })
}

/// Escapes a label value for use inside a double-quoted PromQL string.
fn escape(value: &str) -> String {
    value.replace('\\', r"\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn schema<'a>(labels: &'a LabelSettings, families: &'a FamilySettings) -> SampleSchema<'a> {
        SampleSchema {
            run_id: "run-1",
            labels,
            families,
        }
    }

    #[test]
    fn selector_covers_families_and_run() {
        let (labels, families) = (LabelSettings::default(), FamilySettings::default());
        let schema = SampleSchema {
            run_id: r#"a"b"#,
            labels: &labels,
            families: &families,
        };
        assert_eq!(
            schema.selector(),
            r#"{__name__=~"k6_http_req_duration_(avg|min|med|max|p90|p95|p99)|k6_http_reqs_total|k6_http_req_connecting_avg|k6_http_req_tls_handshaking_avg|k6_http_req_waiting_avg",testid="a\"b"}"#
        );
    }

    #[test]
    fn selector_escapes_family_metacharacters() {
        let labels = LabelSettings::default();
        let families = FamilySettings {
            requests: "http.reqs+total".into(),
            ..Default::default()
        };
        let selector = schema(&labels, &families).selector();
        // PromQL unquotes `\\.` back to the regex `\.`
        assert!(selector.contains(r"|http\\.reqs\\+total|"), "{selector}");
        assert!(!selector.contains("|http.reqs+total|"));
    }

    #[test]
    fn decodes_duration_indicator() {
        let (labels, families) = (LabelSettings::default(), FamilySettings::default());
        let raw = RawSample::new(
            [
                ("__name__", "k6_http_req_duration_med"),
                ("testid", "run-1"),
                ("client", "geth"),
                ("method", "eth_call"),
            ],
            0.012,
        );
        let sample = schema(&labels, &families).decode(&raw).unwrap();
        assert_eq!(sample.client, "geth");
        assert_eq!(sample.method, "eth_call");
        assert_eq!(sample.kind, SampleKind::Duration(Indicator::Med));
    }

    #[test]
    fn decodes_request_counter_labels() {
        let (labels, families) = (LabelSettings::default(), FamilySettings::default());
        let raw = RawSample::new(
            [
                ("__name__", "k6_http_reqs_total"),
                ("testid", "run-1"),
                ("client", "besu"),
                ("method", "eth_getLogs"),
                ("error_code", "1211"),
                ("status", "0"),
            ],
            3.0,
        );
        let sample = schema(&labels, &families).decode(&raw).unwrap();
        assert_eq!(
            sample.kind,
            SampleKind::Requests {
                error_code: Some("1211".into()),
                status: Some("0".into()),
            }
        );

        let ok = RawSample::new(
            [
                ("__name__", "k6_http_reqs_total"),
                ("testid", "run-1"),
                ("client", "besu"),
                ("method", "eth_getLogs"),
                ("error_code", ""),
            ],
            3.0,
        );
        let sample = schema(&labels, &families).decode(&ok).unwrap();
        assert_eq!(
            sample.kind,
            SampleKind::Requests {
                error_code: None,
                status: None,
            }
        );
    }

    #[test]
    fn rejects_foreign_and_incomplete_series() {
        let (labels, families) = (LabelSettings::default(), FamilySettings::default());
        let schema = schema(&labels, &families);
        let other_run = RawSample::new(
            [
                ("__name__", "k6_http_reqs_total"),
                ("testid", "run-2"),
                ("client", "geth"),
                ("method", "eth_call"),
            ],
            1.0,
        );
        let no_method = RawSample::new(
            [
                ("__name__", "k6_http_reqs_total"),
                ("testid", "run-1"),
                ("client", "geth"),
            ],
            1.0,
        );
        let unknown_indicator = RawSample::new(
            [
                ("__name__", "k6_http_req_duration_p75"),
                ("testid", "run-1"),
                ("client", "geth"),
                ("method", "eth_call"),
            ],
            1.0,
        );
        let negative = RawSample::new(
            [
                ("__name__", "k6_http_req_duration_avg"),
                ("testid", "run-1"),
                ("client", "geth"),
                ("method", "eth_call"),
            ],
            -1.0,
        );
        assert!(schema.decode(&other_run).is_none());
        assert!(schema.decode(&no_method).is_none());
        assert!(schema.decode(&unknown_indicator).is_none());
        assert!(schema.decode(&negative).is_none());
    }

    #[test]
    fn decodes_connection_phases() {
        let (labels, families) = (LabelSettings::default(), FamilySettings::default());
        let raw = RawSample::new(
            [
                ("__name__", "k6_http_req_tls_handshaking_avg"),
                ("testid", "run-1"),
                ("client", "geth"),
                ("method", "eth_call"),
            ],
            0.002,
        );
        let sample = schema(&labels, &families).decode(&raw).unwrap();
        assert_eq!(sample.kind, SampleKind::Connection(Phase::TlsHandshaking));
    }
}
