//! Sessions and the collaborators they run requests with.
use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::{
    channel::ChannelProvider,
    codec::{CodecRegistry, DefaultCodecRegistry},
    config::DriverConfig,
    error::{DriverError, RequestError},
    metadata::{MetadataManager, NoopMetadata, TopologyMonitor},
    metrics::{MetricUpdater, NoopMetricUpdater},
    plan::LoadBalancingPolicy,
    policy::{
        DefaultRetryPolicy, NoSpeculativeExecutionPolicy, RetryPolicy, SpeculativeExecutionPolicy,
    },
    protocol::{Message, Response, ResultMessage},
    request::{AdminRequest, RequestHandler, RequestLogFormatter, ResultFuture},
    statement::{PreparedStatement, Statement},
    throttle::{PassThroughRequestThrottler, RequestThrottler},
    timer::Timer,
    tracker::{NoopRequestTracker, RequestTracker},
};

/// What is needed to prepare a statement again on a node that lost it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepreparePayload {
    pub id: Vec<u8>,
    pub query: String,
    pub keyspace: Option<String>,
    pub custom_payload: Vec<(String, Vec<u8>)>,
}

/// Configuration plus every collaborator a session delegates to.
pub struct DriverContext {
    pub(crate) config: DriverConfig,
    pub(crate) channels: Arc<dyn ChannelProvider>,
    pub(crate) load_balancing: Arc<dyn LoadBalancingPolicy>,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) speculative_policy: Arc<dyn SpeculativeExecutionPolicy>,
    pub(crate) throttler: Arc<dyn RequestThrottler>,
    pub(crate) tracker: Arc<dyn RequestTracker>,
    pub(crate) metrics: Arc<dyn MetricUpdater>,
    pub(crate) topology: Arc<dyn TopologyMonitor>,
    pub(crate) metadata: Arc<dyn MetadataManager>,
    pub(crate) codec_registry: Arc<dyn CodecRegistry>,
    pub(crate) timer: Timer,
    pub(crate) formatter: RequestLogFormatter,
}

impl DriverContext {
    pub fn builder(
        channels: Arc<dyn ChannelProvider>,
        load_balancing: Arc<dyn LoadBalancingPolicy>,
    ) -> DriverContextBuilder {
        DriverContextBuilder {
            config: DriverConfig::default(),
            channels,
            load_balancing,
            retry_policy: None,
            speculative_policy: Arc::new(NoSpeculativeExecutionPolicy),
            throttler: Arc::new(PassThroughRequestThrottler),
            tracker: Arc::new(NoopRequestTracker),
            metrics: Arc::new(NoopMetricUpdater),
            topology: Arc::new(NoopMetadata),
            metadata: Arc::new(NoopMetadata),
            codec_registry: None,
            runtime: None,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn codec_registry(&self) -> &Arc<dyn CodecRegistry> {
        &self.codec_registry
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }
}

pub struct DriverContextBuilder {
    config: DriverConfig,
    channels: Arc<dyn ChannelProvider>,
    load_balancing: Arc<dyn LoadBalancingPolicy>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    speculative_policy: Arc<dyn SpeculativeExecutionPolicy>,
    throttler: Arc<dyn RequestThrottler>,
    tracker: Arc<dyn RequestTracker>,
    metrics: Arc<dyn MetricUpdater>,
    topology: Arc<dyn TopologyMonitor>,
    metadata: Arc<dyn MetadataManager>,
    codec_registry: Option<Arc<dyn CodecRegistry>>,
    runtime: Option<Handle>,
}

impl DriverContextBuilder {
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_speculative_execution_policy(
        mut self,
        policy: Arc<dyn SpeculativeExecutionPolicy>,
    ) -> Self {
        self.speculative_policy = policy;
        self
    }

    pub fn with_throttler(mut self, throttler: Arc<dyn RequestThrottler>) -> Self {
        self.throttler = throttler;
        self
    }

    pub fn with_request_tracker(mut self, tracker: Arc<dyn RequestTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricUpdater>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_topology_monitor(mut self, topology: Arc<dyn TopologyMonitor>) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_metadata_manager(mut self, metadata: Arc<dyn MetadataManager>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_codec_registry(mut self, registry: Arc<dyn CodecRegistry>) -> Self {
        self.codec_registry = Some(registry);
        self
    }

    /// Runtime that timers and attempts run on. Defaults to the current one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<DriverContext, DriverError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| {
                DriverError::InvalidArgument(format!("no tokio runtime to run requests on: {e}"))
            })?,
        };
        let session_name = self.config.session_name().to_string();
        Ok(DriverContext {
            retry_policy: self
                .retry_policy
                .unwrap_or_else(|| Arc::new(DefaultRetryPolicy::new(session_name.clone()))),
            codec_registry: self
                .codec_registry
                .unwrap_or_else(|| Arc::new(DefaultCodecRegistry::new(session_name))),
            config: self.config,
            channels: self.channels,
            load_balancing: self.load_balancing,
            speculative_policy: self.speculative_policy,
            throttler: self.throttler,
            tracker: self.tracker,
            metrics: self.metrics,
            topology: self.topology,
            metadata: self.metadata,
            timer: Timer::new(runtime),
            formatter: RequestLogFormatter,
        })
    }
}

pub(crate) struct SessionInner {
    log_prefix: String,
    context: DriverContext,
    keyspace: RwLock<Option<String>>,
    reprepare_payloads: DashMap<Vec<u8>, RepreparePayload>,
    next_request_id: AtomicU64,
    /// Requests that have not reached an outcome yet, failed on close.
    live_requests: DashMap<u64, Weak<RequestHandler>>,
}

impl SessionInner {
    pub fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    pub fn context(&self) -> &DriverContext {
        &self.context
    }

    pub fn keyspace(&self) -> Option<String> {
        self.keyspace.read().clone()
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn reprepare_payload(&self, id: &[u8]) -> Option<RepreparePayload> {
        self.reprepare_payloads
            .get(id)
            .map(|payload| payload.value().clone())
    }

    pub fn track_request(&self, id: u64, handler: &Arc<RequestHandler>) {
        self.live_requests.insert(id, Arc::downgrade(handler));
    }

    pub fn untrack_request(&self, id: u64) {
        self.live_requests.remove(&id);
    }

    fn fail_live_requests(&self) {
        // Collected first: closing a handler untracks it, which needs the map's locks.
        let live: Vec<_> = self
            .live_requests
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.live_requests.clear();
        if !live.is_empty() {
            debug!(
                "[{}] Failing {} in-flight request(s)",
                self.log_prefix,
                live.len()
            );
        }
        for handler in live.iter().filter_map(Weak::upgrade) {
            handler.close();
        }
    }

    pub async fn set_keyspace(&self, keyspace: &str) -> Result<(), DriverError> {
        debug!("[{}] Switching to keyspace {}", self.log_prefix, keyspace);
        *self.keyspace.write() = Some(keyspace.to_string());
        self.context.channels.set_keyspace(keyspace).await
    }
}

/// Entry point for running statements against the cluster.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(context: DriverContext) -> Self {
        let log_prefix = context.config.session_name().to_string();
        debug!("[{log_prefix}] Creating session");
        Self {
            inner: Arc::new(SessionInner {
                log_prefix,
                context,
                keyspace: RwLock::new(None),
                reprepare_payloads: DashMap::new(),
                next_request_id: AtomicU64::new(0),
                live_requests: DashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.log_prefix()
    }

    pub fn context(&self) -> &DriverContext {
        self.inner.context()
    }

    pub fn keyspace(&self) -> Option<String> {
        self.inner.keyspace()
    }

    /// Runs `statement`. The returned future resolves exactly once.
    pub fn execute(&self, statement: Statement) -> ResultFuture {
        RequestHandler::start(statement, Arc::clone(&self.inner))
    }

    /// Prepares `statement` on the first node of a query plan that has a connection.
    pub async fn prepare(
        &self,
        statement: Statement,
    ) -> Result<Arc<PreparedStatement>, RequestError> {
        let inner = &self.inner;
        let context = &inner.context;
        if context.timer.is_stopped() {
            return Err(DriverError::SessionClosed.into());
        }
        let profile = match statement.profile() {
            Some(name) => context.config.profile(name).ok_or_else(|| {
                DriverError::InvalidArgument(format!("Unknown execution profile '{name}'"))
            })?,
            None => context.config.default_profile(),
        };
        let keyspace = inner.keyspace();
        let log_prefix = format!("{}|{}", inner.log_prefix, inner.next_request_id());
        let plan = context
            .load_balancing
            .new_query_plan(&statement, keyspace.as_deref());
        let (node, channel) = loop {
            let Some(node) = plan.poll() else {
                return Err(DriverError::AllNodesFailed(Vec::new()).into());
            };
            if let Some(channel) = context.channels.channel_for(&node, &log_prefix) {
                break (node, channel);
            }
        };

        let query = statement.query().to_string();
        let custom_payload = statement.custom_payload().to_vec();
        let prepare = AdminRequest::new(
            node,
            channel,
            Message::Prepare {
                query: query.clone(),
                keyspace: keyspace.clone(),
            },
            custom_payload.clone(),
            statement.timeout().unwrap_or(profile.request_timeout),
            Arc::clone(&context.throttler),
            Arc::clone(&context.metrics),
            profile.name.clone(),
            context.timer.handle().clone(),
            log_prefix,
            format!("Prepare {query}"),
        );
        match prepare.start().await? {
            ResultMessage::Prepared {
                id,
                variables,
                columns,
            } => {
                inner.reprepare_payloads.insert(
                    id.clone(),
                    RepreparePayload {
                        id: id.clone(),
                        query: query.clone(),
                        keyspace: keyspace.clone(),
                        custom_payload,
                    },
                );
                Ok(Arc::new(PreparedStatement::new(
                    id, query, keyspace, variables, columns,
                )))
            }
            other => {
                Err(DriverError::UnexpectedResponse(Response::Result(other).to_string()).into())
            }
        }
    }

    /// Sets the keyspace used by statements that do not qualify their tables.
    pub async fn set_keyspace(&self, keyspace: &str) -> Result<(), DriverError> {
        self.inner.set_keyspace(keyspace).await
    }

    /// Stops the throttler and the timer, then fails every request still running with
    /// [`DriverError::SessionClosed`]. Requests submitted afterwards fail with
    /// [`DriverError::SessionClosed`] or a throttling error.
    pub fn close(&self) {
        if self.inner.context.timer.is_stopped() {
            warn!("[{}] Session already closed", self.inner.log_prefix);
            return;
        }
        debug!("[{}] Closing session", self.inner.log_prefix);
        self.inner.context.throttler.close();
        self.inner.context.timer.stop();
        self.inner.fail_live_requests();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.context.timer.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::{ErrorCode, ErrorMessage},
        sim::{Reply, SimulatedCluster, prepared_id},
    };

    fn session(cluster: &Arc<SimulatedCluster>) -> Session {
        let context = DriverContext::builder(cluster.clone(), cluster.load_balancing())
            .build()
            .unwrap();
        Session::new(context)
    }

    #[test]
    fn building_needs_a_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let cluster = Arc::new(SimulatedCluster::new(runtime.handle().clone(), 1));
        let builder = || DriverContext::builder(cluster.clone(), cluster.load_balancing());

        assert!(matches!(
            builder().build(),
            Err(DriverError::InvalidArgument(_))
        ));
        assert!(builder().with_runtime(runtime.handle().clone()).build().is_ok());
    }

    #[tokio::test]
    async fn prepare_records_reprepare_payload() {
        let cluster = Arc::new(SimulatedCluster::new(Handle::current(), 1));
        let session = session(&cluster);
        session.set_keyspace("ks").await.unwrap();

        let prepared = session
            .prepare(Statement::new("SELECT * FROM t").with_custom_payload("k", vec![1]))
            .await
            .unwrap();
        assert_eq!(prepared.id(), prepared_id("SELECT * FROM t").as_slice());
        assert_eq!(prepared.keyspace(), Some("ks"));
        assert_eq!(
            session.inner.reprepare_payload(prepared.id()),
            Some(RepreparePayload {
                id: prepared.id().to_vec(),
                query: "SELECT * FROM t".into(),
                keyspace: Some("ks".into()),
                custom_payload: vec![("k".into(), vec![1])],
            })
        );
    }

    #[tokio::test]
    async fn prepare_failures() {
        let cluster = Arc::new(SimulatedCluster::new(Handle::current(), 1));
        let session = session(&cluster);
        cluster
            .node(0)
            .push_prepare_reply(Reply::Respond(Response::Error(ErrorMessage::new(
                ErrorCode::Invalid,
                "unconfigured table t",
            ))));
        let error = session
            .prepare(Statement::new("SELECT * FROM t"))
            .await
            .unwrap_err();
        assert_eq!(error.error().code(), Some(&ErrorCode::Invalid));

        cluster.node(0).set_available(false);
        let error = session
            .prepare(Statement::new("SELECT * FROM t"))
            .await
            .unwrap_err();
        assert!(matches!(error.error(), DriverError::AllNodesFailed(_)));
    }

    #[tokio::test]
    async fn finished_requests_are_no_longer_tracked() {
        let cluster = Arc::new(SimulatedCluster::new(Handle::current(), 1));
        let session = session(&cluster);

        session.execute(Statement::new("SELECT * FROM t")).await.unwrap();
        cluster.node(0).push_reply(Reply::NoResponse);
        let pending = session.execute(Statement::new("SELECT * FROM t"));
        assert_eq!(session.inner.live_requests.len(), 1);

        assert!(pending.cancel());
        assert!(session.inner.live_requests.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let cluster = Arc::new(SimulatedCluster::new(Handle::current(), 1));
        let session = session(&cluster);
        let clone = session.clone();

        session.close();
        clone.close();
        assert!(session.is_closed());
        let error = clone
            .prepare(Statement::new("SELECT * FROM t"))
            .await
            .unwrap_err();
        assert!(matches!(error.error(), DriverError::SessionClosed));
    }
}
