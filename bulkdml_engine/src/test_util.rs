//! Scripted transport and progress sink for tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    progress::ProgressReporter,
    request::{
        BatchItem, BatchOutcome, ExecuteMultipleSettings, Fault, MutationOutcome, MutationRequest,
        MutationResponse,
    },
    transport::{Transport, TransportError},
};

type Responder = dyn Fn(&MutationRequest, usize) -> MutationOutcome + Send + Sync;

#[derive(Default)]
struct Calls {
    execute: AtomicUsize,
    execute_multiple: AtomicUsize,
    /// Sends of each distinct request, retries included
    attempts: Mutex<HashMap<String, usize>>,
    envelope_sizes: Mutex<Vec<usize>>,
    clones: Mutex<Vec<bool>>,
    envelope_faults: Mutex<VecDeque<Fault>>,
}

/// A [`Transport`] answering every request with a scripted outcome
///
/// The responder is given the request and how many times that same request was sent before.
/// Clones share the script and the call counters.
#[derive(Clone)]
pub(crate) struct StubTransport {
    responder: Arc<Responder>,
    calls: Arc<Calls>,
    parallel: bool,
    recommended: Option<std::num::NonZeroUsize>,
}

impl std::fmt::Debug for StubTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubTransport")
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

impl StubTransport {
    pub(crate) fn new(
        responder: impl Fn(&MutationRequest, usize) -> MutationOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(responder),
            calls: Default::default(),
            parallel: true,
            recommended: None,
        }
    }

    pub(crate) fn succeeding() -> Self {
        Self::new(|_, _| MutationOutcome::Success(MutationResponse::default()))
    }

    /// Reject the next envelope as a whole with `fault`
    pub(crate) fn with_envelope_fault(self, fault: Fault) -> Self {
        self.calls.envelope_faults.lock().push_back(fault);
        self
    }

    pub(crate) fn serial(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub(crate) fn with_recommended_parallelism(mut self, n: usize) -> Self {
        self.recommended = std::num::NonZeroUsize::new(n);
        self
    }

    pub(crate) fn execute_calls(&self) -> usize {
        self.calls.execute.load(Ordering::SeqCst)
    }

    pub(crate) fn execute_multiple_calls(&self) -> usize {
        self.calls.execute_multiple.load(Ordering::SeqCst)
    }

    /// Number of distinct requests the server has seen
    pub(crate) fn distinct_requests(&self) -> usize {
        self.calls.attempts.lock().len()
    }

    /// How many times each distinct request was sent, keyed by its JSON form
    pub(crate) fn attempts(&self) -> HashMap<String, usize> {
        self.calls.attempts.lock().clone()
    }

    pub(crate) fn envelope_sizes(&self) -> Vec<usize> {
        self.calls.envelope_sizes.lock().clone()
    }

    /// The affinity flag of every handle cloned so far
    pub(crate) fn clones(&self) -> Vec<bool> {
        self.calls.clones.lock().clone()
    }

    fn respond(&self, request: &MutationRequest) -> MutationOutcome {
        let key = serde_json::to_string(request).expect("request serializes");
        let attempt = {
            let mut attempts = self.calls.attempts.lock();
            let n = attempts.entry(key).or_default();
            *n += 1;
            *n - 1
        };
        (self.responder)(request, attempt)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn execute(&self, request: &MutationRequest) -> Result<MutationOutcome, TransportError> {
        self.calls.execute.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.respond(request))
    }

    async fn execute_multiple(
        &self,
        requests: &[MutationRequest],
        settings: ExecuteMultipleSettings,
    ) -> Result<BatchOutcome, TransportError> {
        self.calls.execute_multiple.fetch_add(1, Ordering::SeqCst);
        self.calls.envelope_sizes.lock().push(requests.len());
        tokio::task::yield_now().await;

        if let Some(fault) = self.calls.envelope_faults.lock().pop_front() {
            return Ok(BatchOutcome::Fault(fault));
        }

        let mut items = vec![];
        for (request_index, request) in requests.iter().enumerate() {
            match self.respond(request) {
                MutationOutcome::Fault(fault) => {
                    items.push(BatchItem {
                        request_index,
                        outcome: MutationOutcome::Fault(fault.with_request_index(request_index)),
                    });
                    if !settings.continue_on_error {
                        break;
                    }
                }
                success if settings.return_responses => items.push(BatchItem {
                    request_index,
                    outcome: success,
                }),
                _ => {}
            }
        }
        Ok(BatchOutcome::Items(items))
    }

    fn clone_connection(&self, affinity: bool) -> Result<Arc<dyn Transport>, TransportError> {
        self.calls.clones.lock().push(affinity);
        Ok(Arc::new(self.clone()))
    }

    fn can_parallelize(&self) -> bool {
        self.parallel
    }

    fn recommended_parallelism(&self) -> Option<std::num::NonZeroUsize> {
        self.recommended
    }
}

/// A [`ProgressReporter`] that keeps every report
#[derive(Debug, Default)]
pub(crate) struct RecordingProgress {
    reports: Mutex<Vec<(f64, String)>>,
}

impl RecordingProgress {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.reports.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub(crate) fn fractions(&self) -> Vec<f64> {
        self.reports.lock().iter().map(|(p, _)| *p).collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, progress: f64, message: &str) {
        self.reports.lock().push((progress, message.to_owned()));
    }
}
