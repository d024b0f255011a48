//! Downstream milestone sync (TargetProcess "Key Milestones").
//!
//! Each milestone is posted on its own; a failure is logged and the batch
//! moves on. The outcome is summarised in a [`SyncReport`] that ends up in
//! `metadata.sync_status`, `metadata.milestones_synced` and
//! `metadata.sync_errors`. Nothing here can fail a pipeline run.

use crate::config::SyncConfig;
use crate::error::{SowError, SyncError};
use crate::model::Milestone;
use crate::output::{SyncFailure, SyncStatus};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Receiver of extracted milestones.
#[async_trait]
pub trait MilestoneSink: Send + Sync {
    async fn send(&self, milestone: &Milestone) -> Result<(), SyncError>;
}

/// Request body for `POST /api/v1/KeyMilestones`.
#[derive(Debug, Serialize, PartialEq)]
pub struct KeyMilestonePayload<'a> {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description")]
    pub description: &'a str,
    #[serde(rename = "Date")]
    pub date: Option<&'a str>,
    #[serde(rename = "Payment")]
    pub payment: Option<&'a str>,
    #[serde(rename = "SOW")]
    pub sow: bool,
}

impl<'a> KeyMilestonePayload<'a> {
    pub fn from_milestone(m: &'a Milestone) -> Self {
        let description = m.description.trim();
        let name = if description.is_empty() {
            m.name.clone()
        } else {
            format!("{} - {}", m.name, description)
        };
        Self {
            name,
            description,
            date: m.due_date.as_deref(),
            payment: m.payment_amount.as_deref(),
            sow: true,
        }
    }
}

/// HTTP client for a TargetProcess instance.
pub struct TargetProcessClient {
    http: reqwest::Client,
    config: SyncConfig,
}

impl TargetProcessClient {
    pub fn new(config: SyncConfig) -> Result<Self, SowError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SowError::InvalidConfig(format!("sync HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Client from `TARGETPROCESS_DOMAIN` / `TARGETPROCESS_ACCESS_TOKEN`,
    /// or `None` when either is unset.
    pub fn from_env() -> Result<Option<Self>, SowError> {
        SyncConfig::from_env().map(Self::new).transpose()
    }
}

#[async_trait]
impl MilestoneSink for TargetProcessClient {
    async fn send(&self, milestone: &Milestone) -> Result<(), SyncError> {
        let url = self.config.milestones_url();
        let payload = KeyMilestonePayload::from_milestone(milestone);
        let response = self
            .http
            .post(&url)
            .query(&[("access_token", self.config.access_token.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| SyncError::Request {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Synced milestone '{}' ({})", milestone.name, status);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SyncError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// How many milestones the sink accepted, and why the others were refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub sent: usize,
    pub total: usize,
    /// One entry per rejected milestone, in send order.
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn status(&self) -> SyncStatus {
        match (self.sent, self.total) {
            (_, 0) => SyncStatus::Skipped,
            (s, t) if s == t => SyncStatus::Success,
            (0, _) => SyncStatus::Failed,
            _ => SyncStatus::Partial,
        }
    }
}

/// Send every milestone in order, continuing past failures.
///
/// Takes the list by value so the returned future holds no borrow of the
/// caller's result and stays `Send` inside spawned pipelines.
pub async fn sync_milestones(sink: &dyn MilestoneSink, milestones: Vec<Milestone>) -> SyncReport {
    let mut report = SyncReport {
        total: milestones.len(),
        ..SyncReport::default()
    };
    for milestone in milestones {
        match sink.send(&milestone).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                warn!("Milestone '{}' not synced: {}", milestone.name, e);
                report.failures.push(SyncFailure {
                    milestone: milestone.name,
                    error: e.to_string(),
                });
            }
        }
    }
    info!("Sent {}/{} milestones", report.sent, report.total);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlakySink {
        reject: &'static str,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MilestoneSink for FlakySink {
        async fn send(&self, m: &Milestone) -> Result<(), SyncError> {
            self.seen.lock().unwrap().push(m.name.clone());
            if m.name == self.reject {
                return Err(SyncError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn milestone(name: &str) -> Milestone {
        Milestone {
            name: name.into(),
            description: "Phase".into(),
            due_date: Some("2024-01-15".into()),
            payment_amount: Some("$5,000".into()),
            payment_percentage: None,
        }
    }

    #[test]
    fn payload_uses_targetprocess_field_names() {
        let m = milestone("Kickoff");
        let v = serde_json::to_value(KeyMilestonePayload::from_milestone(&m)).unwrap();
        assert_eq!(v["Name"], "Kickoff - Phase");
        assert_eq!(v["Date"], "2024-01-15");
        assert_eq!(v["Payment"], "$5,000");
        assert_eq!(v["SOW"], true);

        let bare = Milestone {
            name: "Go-live".into(),
            ..Default::default()
        };
        let p = KeyMilestonePayload::from_milestone(&bare);
        assert_eq!(p.name, "Go-live");
        assert_eq!(p.date, None);
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let sink = FlakySink {
            reject: "B",
            seen: Mutex::new(Vec::new()),
        };
        let report = sync_milestones(&sink, vec![milestone("A"), milestone("B"), milestone("C")]).await;
        assert_eq!((report.sent, report.total), (2, 3));
        assert_eq!(report.status(), SyncStatus::Partial);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].milestone, "B");
        assert!(report.failures[0].error.contains("500"));
        assert_eq!(*sink.seen.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn report_status() {
        let report = |sent, total| SyncReport {
            sent,
            total,
            failures: Vec::new(),
        };
        assert_eq!(report(0, 0).status(), SyncStatus::Skipped);
        assert_eq!(report(2, 2).status(), SyncStatus::Success);
        assert_eq!(report(0, 2).status(), SyncStatus::Failed);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        let client = TargetProcessClient::new(SyncConfig::new("http://127.0.0.1:9", "token")).unwrap();
        let err = client.send(&milestone("A")).await.unwrap_err();
        match err {
            SyncError::Request { url, .. } => {
                assert_eq!(url, "http://127.0.0.1:9/api/v1/KeyMilestones");
                assert!(!url.contains("token"));
            }
            other => panic!("expected request error, got {other:?}"),
        }
    }
}
