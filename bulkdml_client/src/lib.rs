//! HTTP client for a JSON record service, usable as a [`Transport`] by the DML engine.

mod transport;

use std::{num::NonZeroUsize, sync::Arc};

use bulkdml_engine::{
    ConnectionSettings, ConnectionTuning, EntityMetadata, Fault, SharedConnectionSettings,
};
use parking_lot::Mutex;
use reqwest::{IntoUrl, Method, RequestBuilder, Response, StatusCode, header::HeaderMap};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use url::Url;

/// Header carrying the token that pins a connection to one server node
pub const SESSION_AFFINITY_HEADER: &str = "x-session-affinity";

/// Primary error type for the [`Client`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to build the HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("failed to parse JSON response: {0}")]
    Json(#[source] reqwest::Error),

    #[error("failed to parse plaintext response: {0}")]
    Text(#[source] reqwest::Error),

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the record service API
///
/// Every clone made through [`Client::fork`] gets its own connection pool, sized from the
/// connection settings current at the time of the clone.
#[derive(Debug, Clone)]
pub struct Client {
    /// The base URL for making requests to the record service
    base_url: Url,
    /// The `Bearer` token to use for authenticating on each request to the server
    auth_token: Option<Secret<String>>,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
    /// Settings consulted when building the HTTP client
    tuning: Arc<dyn ConnectionTuning>,
    /// The affinity token handed out by the server, `None` when affinity is disabled
    affinity: Option<Arc<Mutex<Option<String>>>>,
    recommended_parallelism: Option<NonZeroUsize>,
}

impl Client {
    /// Create a new [`Client`]
    pub fn new<U: IntoUrl>(base_url: U) -> Result<Self> {
        let tuning: Arc<dyn ConnectionTuning> = Arc::new(SharedConnectionSettings::default());
        Ok(Self {
            base_url: base_url.into_url().map_err(Error::BaseUrl)?,
            auth_token: None,
            http_client: http_client(tuning.current())?,
            tuning,
            affinity: Some(Default::default()),
            recommended_parallelism: None,
        })
    }

    /// Set the `Bearer` token that will be sent with each request to the server
    pub fn with_auth_token<S: Into<String>>(mut self, auth_token: S) -> Self {
        self.auth_token = Some(Secret::new(auth_token.into()));
        self
    }

    /// Use shared connection settings, so that changes to them apply to clients forked later
    pub fn with_connection_tuning(mut self, tuning: Arc<dyn ConnectionTuning>) -> Result<Self> {
        self.http_client = http_client(tuning.current())?;
        self.tuning = tuning;
        Ok(self)
    }

    /// Enable or disable session affinity
    pub fn with_affinity(mut self, affinity: bool) -> Self {
        self.affinity = affinity.then(Default::default);
        self
    }

    /// Override the degree of parallelism this client reports to the engine
    pub fn with_recommended_parallelism(mut self, n: Option<NonZeroUsize>) -> Self {
        self.recommended_parallelism = n;
        self
    }

    /// A client to the same server with its own connection pool and affinity token
    pub fn fork(&self, affinity: bool) -> Result<Self> {
        Ok(Self {
            base_url: self.base_url.clone(),
            auth_token: self.auth_token.clone(),
            http_client: http_client(self.tuning.current())?,
            tuning: Arc::clone(&self.tuning),
            affinity: affinity.then(Default::default),
            recommended_parallelism: self.recommended_parallelism,
        })
    }

    /// The affinity token received from the server, if any
    pub fn affinity_token(&self) -> Option<String> {
        self.affinity.as_ref().and_then(|a| a.lock().clone())
    }

    /// Send a `/ping` request to check the server's status and gather its `version` and the
    /// degree of parallelism it recommends
    pub async fn ping(&self) -> Result<PingResponse> {
        let resp = self.send(Method::GET, "/ping", None::<&()>).await?;
        if resp.status().is_success() {
            resp.json().await.map_err(Error::Json)
        } else {
            Err(api_error(resp).await)
        }
    }

    /// Make a request to the `GET /api/v1/metadata/{entity}` API
    pub async fn entity_metadata(&self, entity: &str) -> Result<EntityMetadata> {
        let api_path = format!("/api/v1/metadata/{entity}");
        let resp = self.send(Method::GET, &api_path, None::<&()>).await?;
        match resp.status() {
            StatusCode::OK => resp.json().await.map_err(Error::Json),
            _ => Err(api_error(resp).await),
        }
    }

    async fn send<B: Serialize + Sync + ?Sized>(
        &self,
        method: Method,
        api_path: &str,
        body: Option<&B>,
    ) -> Result<Response> {
        let url = self.base_url.join(api_path)?;
        let mut req: RequestBuilder = self.http_client.request(method.clone(), url);
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        if let Some(token) = self.affinity_token() {
            req = req.header(SESSION_AFFINITY_HEADER, token);
        }

        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(method, api_path, src))?;
        self.remember_affinity(resp.headers());
        Ok(resp)
    }

    fn remember_affinity(&self, headers: &HeaderMap) {
        let Some(affinity) = &self.affinity else {
            return;
        };
        if let Some(token) = headers
            .get(SESSION_AFFINITY_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            affinity.lock().get_or_insert_with(|| token.to_owned());
        }
    }
}

fn http_client(settings: ConnectionSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(settings.connection_limit)
        .tcp_nodelay(!settings.use_nagle)
        .build()
        .map_err(Error::Build)
}

async fn api_error(resp: Response) -> Error {
    let code = resp.status();
    match resp.text().await {
        Ok(message) => Error::ApiError { code, message },
        Err(e) => Error::Text(e),
    }
}

/// The response of the `/ping` API
#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    version: String,
    #[serde(default)]
    recommended_parallelism: Option<usize>,
}

impl PingResponse {
    /// Get the `version` from the response
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The degree of parallelism the server recommends, if it sent a positive one
    pub fn recommended_parallelism(&self) -> Option<NonZeroUsize> {
        self.recommended_parallelism.and_then(NonZeroUsize::new)
    }
}

/// The error body returned by the API
#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    error: ApiFault,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFault {
    code: i32,
    message: String,
}

impl From<ApiFault> for Fault {
    fn from(f: ApiFault) -> Self {
        Self::new(f.code, f.message)
    }
}
