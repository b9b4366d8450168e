use std::{num::NonZeroUsize, sync::Arc};

use async_trait::async_trait;
use bulkdml_engine::{
    BatchItem, BatchOutcome, ExecuteMultipleSettings, Fault, MutationOutcome, MutationRequest,
    MutationResponse, Transport, TransportError,
};
use observability_deps::tracing::debug;
use reqwest::{Method, Response, StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};

use crate::{ApiFault, Client, Error, ErrorBody, Result};

const EXECUTE_PATH: &str = "/api/v1/execute";
const EXECUTE_MULTIPLE_PATH: &str = "/api/v1/execute_multiple";

#[derive(Debug, Serialize)]
struct ExecuteMultipleRequest<'a> {
    requests: &'a [MutationRequest],
    settings: ExecuteMultipleSettings,
}

#[derive(Debug, Deserialize)]
struct ExecuteMultipleResponse {
    responses: Vec<ItemResponse>,
}

#[derive(Debug, Deserialize)]
struct ItemResponse {
    request_index: usize,
    #[serde(default)]
    response: Option<MutationResponse>,
    #[serde(default)]
    fault: Option<ApiFault>,
}

impl Client {
    /// Make a request to the `POST /api/v1/execute` API
    pub async fn execute(&self, request: &MutationRequest) -> Result<MutationOutcome> {
        let resp = self.send(Method::POST, EXECUTE_PATH, Some(request)).await?;
        match resp.status() {
            StatusCode::OK => Ok(MutationOutcome::Success(
                resp.json().await.map_err(Error::Json)?,
            )),
            _ => fault(resp).await.map(MutationOutcome::Fault),
        }
    }

    /// Make a request to the `POST /api/v1/execute_multiple` API
    pub async fn execute_multiple(
        &self,
        requests: &[MutationRequest],
        settings: ExecuteMultipleSettings,
    ) -> Result<BatchOutcome> {
        let body = ExecuteMultipleRequest { requests, settings };
        let resp = self
            .send(Method::POST, EXECUTE_MULTIPLE_PATH, Some(&body))
            .await?;
        if resp.status() != StatusCode::OK {
            return fault(resp).await.map(BatchOutcome::Fault);
        }

        let body: ExecuteMultipleResponse = resp.json().await.map_err(Error::Json)?;
        Ok(BatchOutcome::Items(
            body.responses
                .into_iter()
                .filter_map(|item| {
                    let outcome = match (item.fault, item.response) {
                        (Some(f), _) => MutationOutcome::Fault(
                            Fault::from(f).with_request_index(item.request_index),
                        ),
                        (None, Some(r)) => MutationOutcome::Success(r),
                        (None, None) => return None,
                    };
                    Some(BatchItem {
                        request_index: item.request_index,
                        outcome,
                    })
                })
                .collect(),
        ))
    }
}

/// Decode a non-success response as a [`Fault`]
///
/// Responses that aren't structured faults are errors, except a bare `429 Too Many Requests`,
/// which is a throttling fault with code 429.
async fn fault(resp: Response) -> Result<Fault> {
    let code = resp.status();
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let text = resp.text().await.map_err(Error::Text)?;

    let fault = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Fault::from(body.error),
        Err(_) if code == StatusCode::TOO_MANY_REQUESTS => {
            Fault::new(i32::from(code.as_u16()), text)
        }
        Err(_) => return Err(Error::ApiError { code, message: text }),
    };

    debug!(status = %code, error_code = fault.error_code, "server returned a fault");
    Ok(match retry_after {
        Some(r) => fault.with_retry_after(r),
        None => fault,
    })
}

#[async_trait]
impl Transport for Client {
    async fn execute(
        &self,
        request: &MutationRequest,
    ) -> std::result::Result<MutationOutcome, TransportError> {
        Self::execute(self, request).await.map_err(TransportError::new)
    }

    async fn execute_multiple(
        &self,
        requests: &[MutationRequest],
        settings: ExecuteMultipleSettings,
    ) -> std::result::Result<BatchOutcome, TransportError> {
        Self::execute_multiple(self, requests, settings)
            .await
            .map_err(TransportError::new)
    }

    fn clone_connection(
        &self,
        affinity: bool,
    ) -> std::result::Result<Arc<dyn Transport>, TransportError> {
        let fork = self.fork(affinity).map_err(TransportError::new)?;
        Ok(Arc::new(fork))
    }

    fn can_parallelize(&self) -> bool {
        true
    }

    fn recommended_parallelism(&self) -> Option<NonZeroUsize> {
        self.recommended_parallelism
    }
}

#[cfg(test)]
mod tests {
    use bulkdml_engine::{RequestKind, Value};
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn delete(id: i64) -> MutationRequest {
        MutationRequest::new(RequestKind::Delete, "account").with_key("accountid", id)
    }

    #[tokio::test]
    async fn execute_success() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/api/v1/execute")
            .match_body(Matcher::Json(json!({
                "kind": "create",
                "entity": "account",
                "attributes": {"name": "Contoso"},
            })))
            .with_status(200)
            .with_body(r#"{"id": "a3f8c2f0-3f4e-4b8e-9a1d-0c1b2d3e4f50"}"#)
            .create_async()
            .await;

        let client = Client::new(mock_server.url()).expect("create client");
        let request =
            MutationRequest::new(RequestKind::Create, "account").with_attribute("name", "Contoso");
        let outcome = client.execute(&request).await.expect("execute");

        match outcome {
            MutationOutcome::Success(MutationResponse { id: Some(Value::Uuid(id)), .. }) => {
                assert_eq!(id.to_string(), "a3f8c2f0-3f4e-4b8e-9a1d-0c1b2d3e4f50")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn execute_fault_with_retry_after() {
        let mut mock_server = Server::new_async().await;
        let _mock = mock_server
            .mock("POST", "/api/v1/execute")
            .with_status(503)
            .with_header("Retry-After", "12")
            .with_body(
                json!({"error": {"code": -2147015902, "message": "Number of requests exceeded the limit"}})
                    .to_string(),
            )
            .create_async()
            .await;

        let client = Client::new(mock_server.url()).expect("create client");
        let outcome = client.execute(&delete(1)).await.expect("execute");

        assert_eq!(
            outcome,
            MutationOutcome::Fault(
                Fault::new(-2147015902, "Number of requests exceeded the limit")
                    .with_retry_after("12")
            )
        );
    }

    #[tokio::test]
    async fn bare_429_is_a_throttling_fault() {
        let mut mock_server = Server::new_async().await;
        let _mock = mock_server
            .mock("POST", "/api/v1/execute")
            .with_status(429)
            .create_async()
            .await;

        let client = Client::new(mock_server.url()).expect("create client");
        let outcome = client.execute(&delete(1)).await.expect("execute");

        assert_eq!(outcome, MutationOutcome::Fault(Fault::new(429, "")));
    }

    #[tokio::test]
    async fn unstructured_error_is_a_transport_error() {
        let mut mock_server = Server::new_async().await;
        let _mock = mock_server
            .mock("POST", "/api/v1/execute")
            .with_status(500)
            .with_body("oops")
            .create_async()
            .await;

        let client = Client::new(mock_server.url()).expect("create client");
        assert!(Transport::execute(&client, &delete(1)).await.is_err());
    }

    #[tokio::test]
    async fn execute_multiple_demultiplexes_items() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/api/v1/execute_multiple")
            .match_body(Matcher::Json(json!({
                "requests": [
                    {"kind": "delete", "entity": "account", "keys": {"accountid": 1}},
                    {"kind": "delete", "entity": "account", "keys": {"accountid": 2}},
                    {"kind": "delete", "entity": "account", "keys": {"accountid": 3}},
                ],
                "settings": {"continue_on_error": true, "return_responses": false},
            })))
            .with_status(200)
            .with_body(
                json!({"responses": [
                    {"request_index": 1, "fault": {"code": -2147220891, "message": "denied"}},
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let client = Client::new(mock_server.url()).expect("create client");
        let outcome = client
            .execute_multiple(
                &[delete(1), delete(2), delete(3)],
                ExecuteMultipleSettings {
                    continue_on_error: true,
                    return_responses: false,
                },
            )
            .await
            .expect("execute_multiple");

        assert_eq!(
            outcome,
            BatchOutcome::Items(vec![BatchItem {
                request_index: 1,
                outcome: MutationOutcome::Fault(
                    Fault::new(-2147220891, "denied").with_request_index(1)
                ),
            }])
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_envelope_is_a_fault() {
        let mut mock_server = Server::new_async().await;
        let _mock = mock_server
            .mock("POST", "/api/v1/execute_multiple")
            .with_status(429)
            .with_header("Retry-After", "4")
            .with_body(json!({"error": {"code": -2147015898, "message": "busy"}}).to_string())
            .create_async()
            .await;

        let client = Client::new(mock_server.url()).expect("create client");
        let outcome = client
            .execute_multiple(
                &[delete(1)],
                ExecuteMultipleSettings {
                    continue_on_error: true,
                    return_responses: true,
                },
            )
            .await
            .expect("execute_multiple");

        assert_eq!(
            outcome,
            BatchOutcome::Fault(Fault::new(-2147015898, "busy").with_retry_after("4"))
        );
    }

    #[tokio::test]
    async fn cloned_connections_use_the_same_server() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/api/v1/execute")
            .match_header("Authorization", "Bearer token")
            .with_status(200)
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;

        let client = Client::new(mock_server.url())
            .expect("create client")
            .with_auth_token("token")
            .with_recommended_parallelism(NonZeroUsize::new(6));
        let clone = client.clone_connection(false).expect("clone");

        assert_eq!(clone.recommended_parallelism(), NonZeroUsize::new(6));
        assert!(clone.can_parallelize());
        for transport in [&client as &dyn Transport, clone.as_ref()] {
            assert_eq!(
                transport.execute(&delete(1)).await.expect("execute"),
                MutationOutcome::Success(MutationResponse::default())
            );
        }
        mock.assert_async().await;
    }
}
