//! Batched commit of pending candidate changes.

use serde_json::json;

use crate::{Diagnostic, FabricClient, FabricRequest};

/// Comment attached to every automatic commit.
pub const COMMIT_COMMENT: &str = "Committed by fabric-client";

/// Path of the commit endpoint for `candidate` on `fabric_id`.
pub fn candidate_commit_path(fabric_id: &str, candidate: &str) -> String {
    format!("/api/v1/fabrics/{fabric_id}/candidates/{candidate}")
}

/// Outcome of [`FabricClient::commit_pending`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub committed: Vec<String>,
    pub failed: Vec<(String, Diagnostic)>,
}

impl CommitReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl FabricClient {
    /// Commits `candidate` on every fabric marked pending.
    ///
    /// Each fabric is removed from the pending set once its commit was
    /// attempted, successful or not. Failures are logged and reported, never
    /// returned as an error.
    pub async fn commit_pending(&self, candidate: &str) -> CommitReport {
        let mut report = CommitReport::default();

        for fabric_id in self.pending_fabrics() {
            let path = candidate_commit_path(&fabric_id, candidate);
            let request = FabricRequest::post(path.clone()).with_json(json!({
                "comment": COMMIT_COMMENT,
            }));
            let outcome = self.call(request).await;
            self.clear_pending(&fabric_id);

            match outcome {
                Ok(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(fabric = %fabric_id, candidate, "committed pending changes");
                    report.committed.push(fabric_id);
                }
                Err(err) => {
                    let diagnostic = Diagnostic::from_error(&reqwest::Method::POST, &path, &err);
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        fabric = %fabric_id,
                        candidate,
                        summary = %diagnostic.summary,
                        detail = %diagnostic.detail,
                        "auto-commit failed"
                    );
                    report.failed.push((fabric_id, diagnostic));
                }
            }
        }

        report
    }
}
