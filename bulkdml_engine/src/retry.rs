//! Detection of server-side throttling and the backoff loop that rides it out.
//!
//! A throttled request is re-sent unchanged, as many times as it takes. Only the worker that
//! sent it waits; the other workers keep going.

use std::time::Duration;

use observability_deps::tracing::warn;

use crate::{
    request::{BatchOutcome, ExecuteMultipleSettings, Fault, MutationOutcome, MutationRequest},
    transport::{Transport, TransportError},
};

/// Fault codes the server uses to ask the client to slow down
///
/// * `429`: HTTP too many requests
/// * `-2147015902`: number of requests exceeded the limit
/// * `-2147015903`: combined execution time of requests exceeded the limit
/// * `-2147015898`: number of concurrent requests exceeded the limit
pub const THROTTLING_ERROR_CODES: [i32; 4] = [429, -2147015902, -2147015903, -2147015898];

/// How long to wait when a throttling fault doesn't say
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(2);

/// How a fault should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Retry the same request after the delay
    Throttled(Duration),
    /// Report the fault
    Terminal,
}

/// Decides which faults are throttling and how long to back off for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub default_retry_after: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            default_retry_after: DEFAULT_RETRY_AFTER,
        }
    }
}

impl ThrottlePolicy {
    pub fn classify(&self, fault: &Fault) -> FaultClass {
        if THROTTLING_ERROR_CODES.contains(&fault.error_code) {
            FaultClass::Throttled(fault.retry_after().unwrap_or(self.default_retry_after))
        } else {
            FaultClass::Terminal
        }
    }

    /// Send `request`, backing off and re-sending while it is throttled
    pub(crate) async fn execute(
        &self,
        connection: &dyn Transport,
        request: &MutationRequest,
    ) -> Result<MutationOutcome, TransportError> {
        loop {
            match connection.execute(request).await? {
                MutationOutcome::Fault(fault) => match self.classify(&fault) {
                    FaultClass::Throttled(delay) => backoff(&fault, delay).await,
                    FaultClass::Terminal => return Ok(MutationOutcome::Fault(fault)),
                },
                success => return Ok(success),
            }
        }
    }

    /// Send an envelope, backing off and re-sending while the envelope as a whole is throttled
    pub(crate) async fn execute_multiple(
        &self,
        connection: &dyn Transport,
        requests: &[MutationRequest],
        settings: ExecuteMultipleSettings,
    ) -> Result<BatchOutcome, TransportError> {
        loop {
            match connection.execute_multiple(requests, settings).await? {
                BatchOutcome::Fault(fault) => match self.classify(&fault) {
                    FaultClass::Throttled(delay) => backoff(&fault, delay).await,
                    FaultClass::Terminal => return Ok(BatchOutcome::Fault(fault)),
                },
                items => return Ok(items),
            }
        }
    }
}

async fn backoff(fault: &Fault, delay: Duration) {
    warn!(
        error_code = fault.error_code,
        delay = ?delay,
        message = %fault.message,
        "request throttled, backing off"
    );
    tokio::time::sleep(delay).await;
}
