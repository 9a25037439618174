//! CI provider client — build metadata and console log retrieval.
//!
//! Only the subset of the provider's JSON that the engine consumes is
//! decoded; unknown fields are ignored.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ScanError, ScanResult};

/// Build metadata document, reduced to the failing-step subset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub steps: Vec<StepInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepInfo {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ActionInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionInfo {
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub timedout: bool,
    #[serde(default)]
    pub output_url: Option<String>,
}

/// One element of the log endpoint's payload; the canonical log text is
/// the concatenation of `message` over elements with `type == "out"`.
#[derive(Debug, Clone, Deserialize)]
pub struct LogChunk {
    #[serde(rename = "type", default)]
    pub chunk_type: String,
    #[serde(default)]
    pub message: String,
}

/// The failing step extracted from a build's metadata: the first element
/// of `steps` whose any action has `failed` or `timedout` set.
#[derive(Debug, Clone)]
pub struct FailingStep {
    pub step_name: String,
    pub is_timeout: bool,
    pub output_url: Option<String>,
}

pub fn failing_step(build: &BuildInfo) -> Option<FailingStep> {
    for step in &build.steps {
        if let Some(action) = step.actions.iter().find(|a| a.failed || a.timedout) {
            return Some(FailingStep {
                step_name: step.name.clone(),
                is_timeout: action.timedout,
                output_url: action.output_url.clone(),
            });
        }
    }
    None
}

/// HTTP client for the CI provider. Build metadata lives at
/// `<base>/<build_num>`; log payloads at the step's `output_url`.
#[derive(Debug, Clone)]
pub struct HttpCiProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCiProvider {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Fetch and decode a build's metadata document.
    pub async fn fetch_build(&self, build_num: i64) -> ScanResult<BuildInfo> {
        let url = format!("{}/{build_num}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| ScanError::Network {
                context: "build metadata fetch",
                source,
            })?;

        response.json().await.map_err(|source| ScanError::Decode {
            context: "build metadata decode",
            source,
        })
    }

    /// Fetch and decode a log payload from a step's output URL.
    pub async fn fetch_log(&self, output_url: &str) -> ScanResult<Vec<LogChunk>> {
        let response = self
            .client
            .get(output_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| ScanError::Network {
                context: "log download",
                source,
            })?;

        response.json().await.map_err(|source| ScanError::Decode {
            context: "log payload decode",
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> BuildInfo {
        serde_json::from_str(json).expect("decode build metadata")
    }

    #[test]
    fn decodes_minimal_subset_and_ignores_unknown_fields() {
        let info = decode(
            r#"{
                "build_num": 42,
                "status": "failed",
                "steps": [
                    {
                        "name": "compile",
                        "extra": {"nested": true},
                        "actions": [{"failed": true, "output_url": "http://logs/1", "index": 0}]
                    }
                ]
            }"#,
        );
        assert_eq!(info.steps.len(), 1);
        assert_eq!(info.steps[0].name, "compile");
        assert!(info.steps[0].actions[0].failed);
        assert_eq!(
            info.steps[0].actions[0].output_url.as_deref(),
            Some("http://logs/1")
        );
    }

    #[test]
    fn failing_step_picks_first_failed_action() {
        let info = decode(
            r#"{"steps": [
                {"name": "checkout", "actions": [{"failed": false}]},
                {"name": "compile", "actions": [{"failed": false}, {"failed": true, "output_url": "u"}]},
                {"name": "test", "actions": [{"failed": true}]}
            ]}"#,
        );
        let step = failing_step(&info).expect("failing step");
        assert_eq!(step.step_name, "compile");
        assert!(!step.is_timeout);
        assert_eq!(step.output_url.as_deref(), Some("u"));
    }

    #[test]
    fn failing_step_flags_timeouts() {
        let info = decode(
            r#"{"steps": [{"name": "compile", "actions": [{"timedout": true}]}]}"#,
        );
        let step = failing_step(&info).expect("failing step");
        assert_eq!(step.step_name, "compile");
        assert!(step.is_timeout);
        assert!(step.output_url.is_none());
    }

    #[test]
    fn no_failing_step_for_empty_or_green_builds() {
        assert!(failing_step(&decode(r#"{"steps": []}"#)).is_none());
        assert!(failing_step(&decode(r#"{}"#)).is_none());
        let green = decode(
            r#"{"steps": [{"name": "compile", "actions": [{"failed": false, "timedout": false}]}]}"#,
        );
        assert!(failing_step(&green).is_none());
    }
}
