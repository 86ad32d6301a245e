use std::{error::Error, sync::Arc, time::Duration};

use clap::Parser;
use log::{info, warn};
use tokio::runtime::Handle;

use cryo_driver::{
    DataType, DriverConfig, DriverContext, ExecutionProfile, Session, Statement, Value,
    config::DEFAULT_PROFILE,
    metrics::{InMemoryMetrics, NodeMetric, SessionMetric},
    policy::ConstantSpeculativeExecutionPolicy,
    protocol::{ColumnSpec, ErrorCode, ErrorMessage, Response, ResultMessage},
    sim::{Reply, SimulatedCluster},
    throttle::ConcurrencyLimitingRequestThrottler,
    tracker::RequestLogger,
};

/// Runs a batch of requests against a simulated cluster and reports how they were executed.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Number of simulated nodes
    #[arg(long, default_value_t = 3)]
    nodes: usize,
    /// Number of requests to run
    #[arg(long, default_value_t = 100)]
    requests: usize,
    /// Treat requests as idempotent, allowing retries and speculative executions
    #[arg(long)]
    idempotent: bool,
    /// Start a speculative execution after this many milliseconds
    #[arg(long)]
    speculative_delay_ms: Option<i64>,
    /// Executions per request, including the first one
    #[arg(long, default_value_t = 2)]
    max_executions: usize,
    /// Limit on concurrent requests; unlimited when absent
    #[arg(long)]
    max_concurrent: Option<usize>,
    /// Requests allowed to wait for a concurrency permit
    #[arg(long, default_value_t = 1000)]
    max_queue: usize,
    /// Request timeout in milliseconds, 0 to disable
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
    /// How long each node takes to answer, in milliseconds
    #[arg(long, default_value_t = 5)]
    latency_ms: u64,
    /// Index of a node that answers every request with an overloaded error
    #[arg(long)]
    overloaded_node: Option<usize>,
    /// Log requests slower than this many milliseconds
    #[arg(long, default_value_t = 500)]
    slow_ms: u64,
}

fn row(k: i32) -> Response {
    Response::Result(ResultMessage::Rows {
        columns: vec![ColumnSpec::new("k", DataType::INT)],
        rows: vec![vec![Some(k.to_be_bytes().to_vec())]],
        paging_state: None,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let cluster = Arc::new(SimulatedCluster::new(Handle::current(), cli.nodes));
    let latency = Duration::from_millis(cli.latency_ms);
    for i in 0..cli.nodes {
        cluster
            .node(i)
            .set_fallback(Reply::Delayed(latency, row(i as i32)));
    }
    if let Some(index) = cli.overloaded_node {
        if index >= cli.nodes {
            return Err(format!("no node {index} in a cluster of {}", cli.nodes).into());
        }
        cluster
            .node(index)
            .set_fallback(Reply::Respond(Response::Error(ErrorMessage::new(
                ErrorCode::Overloaded,
                "Too many in flight requests",
            ))));
    }

    let profile = ExecutionProfile::default()
        .with_request_timeout(Duration::from_millis(cli.timeout_ms))
        .with_default_idempotence(cli.idempotent);
    let metrics = Arc::new(InMemoryMetrics::new());
    let mut builder = DriverContext::builder(cluster.clone(), cluster.load_balancing())
        .with_config(DriverConfig::new("sim").with_profile(profile))
        .with_metrics(metrics.clone())
        .with_request_tracker(Arc::new(RequestLogger::new(Duration::from_millis(
            cli.slow_ms,
        ))));
    if let Some(delay) = cli.speculative_delay_ms {
        builder = builder.with_speculative_execution_policy(Arc::new(
            ConstantSpeculativeExecutionPolicy::new(cli.max_executions, delay)?,
        ));
    }
    if let Some(max) = cli.max_concurrent {
        builder = builder.with_throttler(Arc::new(ConcurrencyLimitingRequestThrottler::new(
            "sim",
            max,
            cli.max_queue,
        )));
    }
    let session = Session::new(builder.build()?);

    let closer = session.clone();
    ctrlc::set_handler(move || {
        info!("Interrupted, closing session");
        closer.close();
    })?;

    let requests = (0..cli.requests).map(|i| {
        session.execute(Statement::new("SELECT k FROM t WHERE k = ?").with_value(Value::Int(i as i32)))
    });
    let outcomes = futures::future::join_all(requests).await;
    session.close();

    let (mut succeeded, mut speculative) = (0, 0);
    for outcome in outcomes {
        match outcome {
            Ok(result) => {
                succeeded += 1;
                speculative += result.execution_info().speculative_execution_count;
            }
            Err(e) => warn!("request failed: {e}"),
        }
    }
    println!(
        "{} requests: {succeeded} succeeded, {} failed, {speculative} speculative executions, {} client timeouts",
        cli.requests,
        cli.requests - succeeded,
        metrics.session_count(SessionMetric::CqlClientTimeouts, DEFAULT_PROFILE)
    );
    for (i, node) in cluster.nodes().iter().enumerate() {
        println!(
            "{node}: {} writes, {} retries, {} other errors",
            cluster.node(i).writes(),
            metrics.node_count(node, NodeMetric::Retries, DEFAULT_PROFILE),
            metrics.node_count(node, NodeMetric::OtherErrors, DEFAULT_PROFILE)
        );
    }
    Ok(())
}
