//! HTTP transport backed by a lazily created tokio runtime.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::error::{codes, TransportFailure};
use super::request::{HttpMethod, RequestDescriptor};
use super::{Completion, Metadata, OperationId, Readiness, Transport};
use crate::config::{ServerSettings, SettingsError};

/// Runtime threads shared by all in-flight requests.
const WORKER_THREADS: usize = 2;

/// Transport speaking to the database's HTTP interface.
///
/// Requests run as tasks on a private tokio runtime which is created on the
/// first [`submit`](Transport::submit) and dropped by
/// [`teardown`](Transport::teardown). Finished tasks push their
/// [`Completion`] into a channel that the multiplexer drains.
///
/// The transport blocks the calling thread inside [`wait`](Transport::wait),
/// so it must not be driven from within another async runtime.
///
/// # Example
///
/// ```ignore
/// use chmux::transport::{HttpTransport, RequestDescriptor};
/// use chmux::Multiplexer;
///
/// let mut mux = Multiplexer::new(HttpTransport::new("http://localhost:8123"));
/// mux.start("totals", RequestDescriptor::query("SELECT count() FROM hits"), vec![])?;
/// let body = mux.fetch_results(Some("totals"))?;
/// ```
pub struct HttpTransport {
    endpoint: Endpoint,
    context: Option<Context>,
    next_id: u64,
}

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    user: String,
    password: String,
    database: Option<String>,
    timeout: Duration,
}

/// Shared multiplexing context: runtime, client and completion channel.
struct Context {
    runtime: Runtime,
    client: reqwest::Client,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    /// In-flight (or finished but not yet drained) operations.
    tasks: HashMap<OperationId, JoinHandle<()>>,
    /// Completions picked up by `wait` and not yet drained.
    ready: VecDeque<Completion>,
}

impl HttpTransport {
    /// Create a transport for `url` with default credentials.
    pub fn new(url: impl Into<String>) -> Self {
        let defaults = ServerSettings::default();
        Self::with_endpoint(Endpoint {
            url: url.into().trim_end_matches('/').to_string(),
            user: defaults.user,
            password: defaults.password,
            database: defaults.database,
            timeout: Duration::from_secs(defaults.timeout_secs),
        })
    }

    /// Create a transport from server settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the password references a missing environment
    /// variable.
    pub fn from_settings(server: &ServerSettings) -> Result<Self, SettingsError> {
        Ok(Self::with_endpoint(Endpoint {
            url: server.url.trim_end_matches('/').to_string(),
            user: server.user.clone(),
            password: server.resolved_password()?,
            database: server.database.clone(),
            timeout: server.timeout(),
        }))
    }

    fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            context: None,
            next_id: 0,
        }
    }

    /// Check if the shared context currently exists.
    pub fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    fn context(&mut self) -> Result<&mut Context, TransportFailure> {
        let context = match self.context.take() {
            Some(context) => context,
            None => Context::create(&self.endpoint)?,
        };
        Ok(self.context.insert(context))
    }
}

impl Context {
    fn create(endpoint: &Endpoint) -> Result<Self, TransportFailure> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("chmux-transport")
            .enable_all()
            .build()
            .map_err(|e| {
                TransportFailure::new(codes::FAILED_INIT, format!("failed to start runtime: {}", e))
            })?;

        let client = {
            let _guard = runtime.enter();
            reqwest::Client::builder()
                .timeout(endpoint.timeout)
                .build()
                .map_err(|e| TransportFailure::new(codes::FAILED_INIT, e.to_string()))?
        };

        let (tx, rx) = mpsc::unbounded_channel();
        debug!(url = %endpoint.url, "transport context created");

        Ok(Self {
            runtime,
            client,
            tx,
            rx,
            tasks: HashMap::new(),
            ready: VecDeque::new(),
        })
    }
}

impl Transport for HttpTransport {
    fn submit(&mut self, request: RequestDescriptor) -> Result<OperationId, TransportFailure> {
        self.next_id += 1;
        let id = OperationId(self.next_id);
        let endpoint = self.endpoint.clone();
        let context = self.context()?;

        let builder = build_request(&context.client, &endpoint, &request);
        let tx = context.tx.clone();
        let handle = context.runtime.spawn(async move {
            let completion = perform(id, builder).await;
            // A closed receiver means the context was torn down.
            let _ = tx.send(completion);
        });
        context.tasks.insert(id, handle);

        trace!(op = %id, sql = %request.sql, "request submitted");
        Ok(id)
    }

    fn drain(&mut self) -> Vec<Completion> {
        let Some(context) = self.context.as_mut() else {
            return Vec::new();
        };

        let mut finished: Vec<Completion> = context.ready.drain(..).collect();
        while let Ok(completion) = context.rx.try_recv() {
            finished.push(completion);
        }

        // Completions of closed operations are stale
        let tasks = &mut context.tasks;
        finished.retain(|completion| tasks.remove(&completion.id).is_some());
        finished
    }

    fn wait(&mut self, timeout: Duration) -> Readiness {
        let Some(context) = self.context.as_mut() else {
            return Readiness::Unsupported;
        };
        if !context.ready.is_empty() {
            return Readiness::Ready;
        }

        let Context {
            runtime, rx, ready, ..
        } = context;
        let received = runtime.block_on(async { tokio::time::timeout(timeout, rx.recv()).await });
        match received {
            Ok(Some(completion)) => {
                ready.push_back(completion);
                Readiness::Ready
            }
            Ok(None) => Readiness::Unsupported,
            Err(_) => Readiness::TimedOut,
        }
    }

    fn running(&self) -> usize {
        self.context.as_ref().map_or(0, |context| context.tasks.len())
    }

    fn close(&mut self, id: OperationId) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        if let Some(handle) = context.tasks.remove(&id) {
            handle.abort();
            debug!(op = %id, "operation released");
        }
        context.ready.retain(|completion| completion.id != id);
    }

    fn teardown(&mut self) {
        if let Some(context) = self.context.take() {
            for handle in context.tasks.values() {
                handle.abort();
            }
            debug!(aborted = context.tasks.len(), "transport context torn down");
            context.runtime.shutdown_background();
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn build_request(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    request: &RequestDescriptor,
) -> reqwest::RequestBuilder {
    let (mut params, body) = request.wire_parts();
    if let Some(database) = &endpoint.database {
        if !params.iter().any(|(name, _)| name == "database") {
            params.push(("database".to_string(), database.clone()));
        }
    }

    let method = match request.method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
    };

    let mut builder = client
        .request(method, endpoint.url.as_str())
        .query(&params)
        .header("X-ClickHouse-User", endpoint.user.as_str());
    if !endpoint.password.is_empty() {
        builder = builder.header("X-ClickHouse-Key", endpoint.password.as_str());
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !body.is_empty() {
        builder = builder.body(body);
    }
    builder
}

async fn perform(id: OperationId, builder: reqwest::RequestBuilder) -> Completion {
    let started = Instant::now();
    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) => return Completion::failure(id, classify(&err)),
    };

    let first_byte = started.elapsed();
    let status = response.status();
    let mut header_lines = vec![format!("{:?} {}", response.version(), status)];
    header_lines.extend(response.headers().iter().map(|(name, value)| {
        format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()))
    }));
    let effective_url = response.url().to_string();

    match response.bytes().await {
        Ok(body) => {
            let mut metadata = Metadata::new();
            metadata.insert("url".to_string(), Value::from(effective_url));
            metadata.insert("size_download".to_string(), Value::from(body.len()));
            metadata.insert(
                "starttransfer_time".to_string(),
                Value::from(first_byte.as_secs_f64()),
            );
            metadata.insert(
                "total_time".to_string(),
                Value::from(started.elapsed().as_secs_f64()),
            );
            Completion::success(id, status.as_u16(), body)
                .with_headers(header_lines)
                .with_metadata(metadata)
        }
        Err(err) => Completion::failure(id, classify(&err)),
    }
}

/// Map a client error onto a transport failure code.
fn classify(err: &reqwest::Error) -> TransportFailure {
    let code = if err.is_timeout() {
        codes::OPERATION_TIMEDOUT
    } else if err.is_connect() {
        codes::COULDNT_CONNECT
    } else if err.is_builder() {
        codes::URL_MALFORMAT
    } else {
        codes::RECV_ERROR
    };
    TransportFailure::new(code, err.to_string())
}
