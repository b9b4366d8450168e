//! Sending buffered requests as one multi-request envelope.

use crate::{
    error::ExecutionError,
    operation::DmlOperation,
    request::{BatchOutcome, ExecuteMultipleSettings, Fault, MutationOutcome, MutationRequest},
    retry::ThrottlePolicy,
    transport::{Transport, TransportError},
};

/// What happened to the requests of one envelope
#[derive(Debug, Default, PartialEq)]
pub(crate) struct BatchReport {
    pub(crate) succeeded: usize,
    /// Every per-request fault, in response order, each carrying the index of its request
    pub(crate) faults: Vec<Fault>,
}

/// Send `requests` in one envelope and demultiplex the per-request outcomes
///
/// The envelope always asks the server to carry on past failed requests, so the outcome of every
/// request is known even when the caller is going to stop after this batch. An envelope rejected
/// as a whole is retried while it is throttled and is an error otherwise.
pub(crate) async fn process_batch(
    connection: &dyn Transport,
    requests: &[MutationRequest],
    operation: &dyn DmlOperation,
    throttle: &ThrottlePolicy,
) -> Result<BatchReport, ExecutionError> {
    let settings = ExecuteMultipleSettings {
        continue_on_error: true,
        return_responses: operation.wants_responses(),
    };

    let items = match throttle
        .execute_multiple(connection, requests, settings)
        .await?
    {
        BatchOutcome::Items(items) => items,
        BatchOutcome::Fault(fault) => return Err(ExecutionError::Fault(fault)),
    };

    let mut faults = vec![];
    for item in items {
        if item.request_index >= requests.len() {
            return Err(TransportError::new(format!(
                "response for request {} of an envelope of {}",
                item.request_index,
                requests.len()
            ))
            .into());
        }

        match item.outcome {
            MutationOutcome::Success(response) => {
                if settings.return_responses {
                    operation.handle_response(&response);
                }
            }
            MutationOutcome::Fault(fault) => {
                faults.push(fault.with_request_index(item.request_index));
            }
        }
    }

    Ok(BatchReport {
        succeeded: requests.len().saturating_sub(faults.len()),
        faults,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        operation::{ColumnMapping, Delete, Insert},
        request::{BatchItem, MutationResponse, RequestKind},
        test_util::StubTransport,
        value::Value,
    };

    fn deletes(n: i64) -> Vec<MutationRequest> {
        (1..=n)
            .map(|i| MutationRequest::new(RequestKind::Delete, "account").with_key("accountid", i))
            .collect()
    }

    fn key(request: &MutationRequest) -> i64 {
        match request.keys.get("accountid") {
            Some(Value::Integer(i)) => *i,
            _ => unreachable!(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn faults_are_demultiplexed_in_response_order() {
        let transport = StubTransport::new(|request, _| match key(request) {
            2 | 4 => {
                MutationOutcome::Fault(Fault::new(-2147220891, format!("no {}", key(request))))
            }
            _ => MutationOutcome::Success(MutationResponse::default()),
        });

        let report = process_batch(
            &transport,
            &deletes(5),
            &Delete::new("account"),
            &ThrottlePolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.succeeded, 3);
        assert_eq!(
            report.faults,
            vec![
                Fault::new(-2147220891, "no 2").with_request_index(1),
                Fault::new(-2147220891, "no 4").with_request_index(3),
            ]
        );
        assert_eq!(transport.envelope_sizes(), [5]);
    }

    #[test_log::test(tokio::test)]
    async fn responses_go_to_operations_that_want_them() {
        let transport = StubTransport::new(|request, _| {
            MutationOutcome::Success(MutationResponse {
                id: request.attributes.get("name").cloned(),
                created: Some(true),
            })
        });
        let insert = Insert::new("account", ColumnMapping::identity(["name"]));
        let requests: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|n| {
                MutationRequest::new(RequestKind::Create, "account").with_attribute("name", n)
            })
            .collect();

        let report = process_batch(&transport, &requests, &insert, &ThrottlePolicy::default())
            .await
            .unwrap();

        assert_eq!(report, BatchReport { succeeded: 2, faults: vec![] });
        assert_eq!(insert.created_ids(), [Value::from("a"), Value::from("b")]);
    }

    /// Answers every envelope with a fault for a request past its end
    #[derive(Debug)]
    struct MisnumberedTransport;

    #[async_trait::async_trait]
    impl Transport for MisnumberedTransport {
        async fn execute(
            &self,
            _request: &MutationRequest,
        ) -> Result<MutationOutcome, TransportError> {
            unimplemented!()
        }

        async fn execute_multiple(
            &self,
            requests: &[MutationRequest],
            _settings: ExecuteMultipleSettings,
        ) -> Result<BatchOutcome, TransportError> {
            Ok(BatchOutcome::Items(vec![BatchItem {
                request_index: requests.len(),
                outcome: MutationOutcome::Fault(Fault::new(-2147220891, "lost")),
            }]))
        }

        fn clone_connection(
            &self,
            _affinity: bool,
        ) -> Result<std::sync::Arc<dyn Transport>, TransportError> {
            unimplemented!()
        }

        fn can_parallelize(&self) -> bool {
            false
        }
    }

    #[test_log::test(tokio::test)]
    async fn response_for_unknown_request_is_an_error() {
        let err = process_batch(
            &MisnumberedTransport,
            &deletes(2),
            &Delete::new("account"),
            &ThrottlePolicy::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExecutionError::Transport(_)), "{err:?}");
        assert_eq!(
            err.to_string(),
            "transport failure: response for request 2 of an envelope of 2"
        );
    }

    #[test_log::test(tokio::test)]
    async fn rejected_envelope_is_fatal() {
        let transport = StubTransport::succeeding()
            .with_envelope_fault(Fault::new(-2147220970, "envelope too large"));

        let err = process_batch(
            &transport,
            &deletes(3),
            &Delete::new("account"),
            &ThrottlePolicy::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.fault(),
            Some(&Fault::new(-2147220970, "envelope too large"))
        );
    }
}
