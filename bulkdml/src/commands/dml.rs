//! Running one DML statement against the record service.

use std::sync::Arc;

use bulkdml_client::Client;
use bulkdml_engine::{
    CompileError, ConnectionSettings, ConnectionTuning, ConstantScan, DataSource, DmlNode,
    DmlOperation, DmlResult, EntityMetadata, ExecutionContext, ExecutionError, ExecutionOptions,
    InMemoryMetadataCache, LogProgress, QueryHints, RowSource, Session, SharedConnectionSettings,
    SourceNode, ThrottlePolicy,
};
use observability_deps::tracing::{debug, info, warn};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;

use super::{common::BulkDmlConfig, rows};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Client(#[from] bulkdml_client::Error),

    #[error(transparent)]
    Rows(#[from] rows::Error),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// The rows of one statement and the data source they are applied to
#[derive(Debug)]
pub(crate) struct Target {
    data_source: String,
    session: Arc<Session>,
    metadata: Arc<EntityMetadata>,
    scan: ConstantScan,
    hints: QueryHints,
    tuning: Arc<dyn ConnectionTuning>,
    parallel_settings: ConnectionSettings,
    throttle: ThrottlePolicy,
}

impl Target {
    /// Read the rows and look the entity up on the record service
    pub(crate) async fn connect(config: &BulkDmlConfig) -> Result<Self> {
        let scan = rows::read(&config.file_path)
            .await?
            .for_entity(&config.entity);

        let tuning: Arc<dyn ConnectionTuning> = Arc::new(SharedConnectionSettings::default());
        let mut client = Client::new(config.host_url.clone())?
            .with_connection_tuning(Arc::clone(&tuning))?;
        if let Some(t) = &config.auth_token {
            client = client.with_auth_token(t.expose_secret());
        }

        let ping = client.ping().await?;
        debug!(
            version = ping.version(),
            recommended_parallelism = ?ping.recommended_parallelism(),
            "connected to the record service"
        );
        let client = client.with_recommended_parallelism(ping.recommended_parallelism());

        let metadata = client.entity_metadata(&config.entity).await?;
        let session = Session::new(config.session.options()).with_data_source(DataSource {
            name: config.data_source.clone(),
            connection: Arc::new(client),
            metadata: Arc::new(InMemoryMetadataCache::new([metadata.clone()])),
        });

        Ok(Self {
            data_source: config.data_source.clone(),
            session: Arc::new(session),
            metadata: Arc::new(metadata),
            scan,
            hints: config.query_hints(),
            tuning,
            parallel_settings: config.tuning.parallel_settings(),
            throttle: config.tuning.throttle(),
        })
    }

    pub(crate) fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }

    /// The columns of the source rows, in file order
    pub(crate) fn columns(&self) -> Vec<String> {
        self.scan
            .schema()
            .column_names()
            .map(str::to_owned)
            .collect()
    }

    /// Apply `operation` to every row, until done or until the process is told to stop
    pub(crate) async fn execute(self, operation: Arc<dyn DmlOperation>) -> Result<DmlResult> {
        let node = DmlNode::new(operation, SourceNode::Scan(Arc::new(self.scan)))
            .with_data_source(self.data_source)
            .fold(&self.session, &self.hints)?;

        let cancellation = CancellationToken::new();
        let options = ExecutionOptions {
            cancellation: cancellation.clone(),
            progress: Arc::new(LogProgress),
            connection_tuning: Some(self.tuning),
            parallel_settings: self.parallel_settings,
            throttle: self.throttle,
        };
        let mut context = ExecutionContext::new(self.session, options);

        let signal = tokio::spawn(async move {
            wait_for_signal().await;
            warn!("stopping, requests already sent will still complete");
            cancellation.cancel();
        });
        let result = node.execute(&mut context).await;
        signal.abort();

        for message in context.messages() {
            eprintln!("{message}");
        }
        if let Some(row_count) = context.row_count() {
            debug!(row_count, "statement finished");
        }

        let result = result?;
        if let Some(fault) = &result.warning {
            warn!(
                errors = result.error_count,
                error_code = fault.error_code,
                "some rows failed"
            );
        }
        info!(records_affected = result.records_affected, "{}", result.message);
        Ok(result)
    }
}

/// Wait for a `SIGTERM` or `SIGINT` to stop the statement on Unix systems
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut term), Ok(mut int)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        warn!("failed to register signal handlers, the statement can't be stopped");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
}

/// Wait for a `ctrl+c` to stop the statement on Windows systems
#[cfg(windows)]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT");
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::io::Write;

    use mockito::{Matcher, Mock, Server, ServerGuard};
    use serde_json::{Value, json};
    use tempfile::NamedTempFile;

    /// A mock record service knowing the `account` entity and recommending a single worker
    pub(crate) struct RecordService {
        server: ServerGuard,
        // kept alive for as long as the server is
        _mocks: Vec<Mock>,
        expected: Vec<Mock>,
    }

    impl RecordService {
        pub(crate) async fn new() -> Self {
            let mut server = Server::new_async().await;
            let ping = server
                .mock("GET", "/ping")
                .with_body(json!({"version": "9.1.0", "recommended_parallelism": 1}).to_string())
                .create_async()
                .await;
            let metadata = server
                .mock("GET", "/api/v1/metadata/account")
                .with_body(
                    json!({
                        "logical_name": "account",
                        "display_name": "account",
                        "display_collection_name": "accounts",
                        "primary_key": ["accountid"],
                    })
                    .to_string(),
                )
                .create_async()
                .await;
            Self {
                server,
                _mocks: vec![ping, metadata],
                expected: vec![],
            }
        }

        pub(crate) fn url(&self) -> String {
            self.server.url()
        }

        /// Expect exactly one envelope holding `requests`, answered with `responses`
        pub(crate) async fn expect_envelope(
            &mut self,
            requests: Value,
            return_responses: bool,
            responses: Value,
        ) {
            let mock = self
                .server
                .mock("POST", "/api/v1/execute_multiple")
                .match_body(Matcher::Json(json!({
                    "requests": requests,
                    "settings": {"continue_on_error": true, "return_responses": return_responses},
                })))
                .with_body(json!({ "responses": responses }).to_string())
                .expect(1)
                .create_async()
                .await;
            self.expected.push(mock);
        }

        /// Expect exactly one single request `request`, answered with an empty response
        pub(crate) async fn expect_single(&mut self, request: Value) {
            let mock = self
                .server
                .mock("POST", "/api/v1/execute")
                .match_body(Matcher::Json(request))
                .with_body("{}")
                .expect(1)
                .create_async()
                .await;
            self.expected.push(mock);
        }

        pub(crate) async fn assert_requests(&self) {
            for mock in &self.expected {
                mock.assert_async().await;
            }
        }

        pub(crate) async fn not_found(&mut self, path: &str) {
            let mock = self
                .server
                .mock("GET", path)
                .with_status(404)
                .with_body("not found")
                .create_async()
                .await;
            self._mocks.push(mock);
        }
    }

    pub(crate) fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    /// Command line arguments addressing `account` records read from `file`
    pub(crate) fn args<'a>(
        command: &'a str,
        service: &'a str,
        file: &'a NamedTempFile,
    ) -> Vec<&'a str> {
        vec![
            command,
            "--host",
            service,
            "--entity",
            "account",
            "--file",
            file.path().to_str().unwrap(),
        ]
    }
}
