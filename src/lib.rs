pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod node;
pub mod plan;
pub mod policy;
pub mod protocol;
pub mod request;
pub mod result;
pub mod session;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod statement;
pub mod throttle;
pub mod timer;
pub mod tracker;

pub use codec::{CodecRegistry, DataType, DefaultCodecRegistry, GenericType, TypeCodec, Value};
pub use config::{DriverConfig, ExecutionProfile};
pub use error::{DriverError, ExecutionInfo, RequestError};
pub use node::Node;
pub use request::ResultFuture;
pub use result::{AsyncResultSet, Row};
pub use session::{DriverContext, Session};
pub use statement::{PreparedStatement, Statement};
