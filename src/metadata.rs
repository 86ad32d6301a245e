//! Cluster metadata collaborators consulted after schema changes.
use futures::future::BoxFuture;

use crate::error::DriverError;

pub trait TopologyMonitor: Send + Sync {
    /// Whether every node reports the same schema version.
    fn check_schema_agreement(&self) -> BoxFuture<'static, Result<bool, DriverError>>;
}

pub trait MetadataManager: Send + Sync {
    fn refresh_schema(&self, keyspace: &str) -> BoxFuture<'static, Result<(), DriverError>>;
}

/// Assumes agreement and never refreshes anything.
#[derive(Debug, Default)]
pub struct NoopMetadata;

impl TopologyMonitor for NoopMetadata {
    fn check_schema_agreement(&self) -> BoxFuture<'static, Result<bool, DriverError>> {
        Box::pin(async { Ok(true) })
    }
}

impl MetadataManager for NoopMetadata {
    fn refresh_schema(&self, _keyspace: &str) -> BoxFuture<'static, Result<(), DriverError>> {
        Box::pin(async { Ok(()) })
    }
}
