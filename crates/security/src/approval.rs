//! Approvals — asking a human whether an `ask` tool may run.
//!
//! [`ApprovalBroker`] parks each request until someone resolves it by id or
//! its timeout elapses (then it is `expired`). [`AutoApprover`] answers every
//! request with a fixed status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use concierge_core::{ApprovalOutcome, ApprovalRequest, ApprovalStatus, PermissionError};

/// Something that can answer an approval request.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalOutcome, PermissionError>;
}

/// Answers every request with the same status.
#[derive(Debug, Clone, Copy)]
pub struct AutoApprover {
    status: ApprovalStatus,
}

impl AutoApprover {
    pub fn new(status: ApprovalStatus) -> Self {
        Self { status }
    }

    pub fn approve_all() -> Self {
        Self::new(ApprovalStatus::Approved)
    }

    pub fn deny_all() -> Self {
        Self::new(ApprovalStatus::Denied)
    }
}

#[async_trait]
impl Approver for AutoApprover {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalOutcome, PermissionError> {
        debug!(tool = %request.tool.name, status = %self.status, "Auto-answering approval");
        Ok(ApprovalOutcome {
            status: self.status,
            approval_id: None,
        })
    }
}

/// A request waiting for a human decision, as announced to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub request: ApprovalRequest,
}

type PendingMap = HashMap<String, (PendingApproval, oneshot::Sender<ApprovalStatus>)>;

/// Removes a parked request once its requester stops waiting, however that happens.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Parks approval requests until they are resolved or expire.
pub struct ApprovalBroker {
    pending: Mutex<PendingMap>,
    announcements: broadcast::Sender<PendingApproval>,
    default_timeout: Duration,
}

impl ApprovalBroker {
    pub fn new(default_timeout: Duration) -> Self {
        let (announcements, _) = broadcast::channel(64);
        Self {
            pending: Mutex::new(HashMap::new()),
            announcements,
            default_timeout,
        }
    }

    /// Receive every new pending approval.
    pub fn subscribe(&self) -> broadcast::Receiver<PendingApproval> {
        self.announcements.subscribe()
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Currently pending approvals.
    pub async fn pending(&self) -> Vec<PendingApproval> {
        self.lock_pending()
            .values()
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Resolve a pending approval with a final status.
    pub async fn resolve(&self, id: &str, status: ApprovalStatus) -> Result<(), PermissionError> {
        if status == ApprovalStatus::Pending {
            return Err(PermissionError::ApprovalFailed(
                "an approval cannot be resolved as pending".into(),
            ));
        }

        let (pending, tx) = self
            .lock_pending()
            .remove(id)
            .ok_or_else(|| PermissionError::UnknownApproval(id.to_string()))?;

        info!(approval_id = id, tool = %pending.request.tool.name, %status, "Approval resolved");
        // The requester may have timed out in the meantime
        let _ = tx.send(status);
        Ok(())
    }
}

#[async_trait]
impl Approver for ApprovalBroker {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalOutcome, PermissionError> {
        let id = uuid::Uuid::new_v4().to_string();
        let timeout = request
            .policy
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let (tx, rx) = oneshot::channel();
        let pending = PendingApproval {
            id: id.clone(),
            request,
        };
        self.lock_pending().insert(id.clone(), (pending.clone(), tx));
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        debug!(
            approval_id = %id,
            tool = %pending.request.tool.name,
            timeout_secs = timeout.as_secs(),
            "Approval pending"
        );
        let _ = self.announcements.send(pending);

        let status = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(status)) => status,
            Ok(Err(_)) => ApprovalStatus::Denied,
            Err(_) => {
                warn!(approval_id = %id, "Approval expired");
                ApprovalStatus::Expired
            }
        };

        Ok(ApprovalOutcome {
            status,
            approval_id: Some(id),
        })
    }
}
