//! Execution backend port.

use async_trait::async_trait;

use crate::domain::models::{ExecutionSlot, JobResult, TestSpec};

/// Runs a single spec inside an exclusively leased slot.
///
/// Implementations never fail: submission problems, crashes and timeouts are
/// all folded into the returned [`JobResult`]. The log path on the result
/// points inside the slot; archiving happens afterwards.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    async fn execute(&self, spec: &TestSpec, slot: &ExecutionSlot) -> JobResult;
}
