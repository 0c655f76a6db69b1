pub mod bulk;
pub mod busy;
pub mod error;
pub mod gateway;
pub mod http_gateway;
pub mod key_resolution;
pub mod lifecycle;
pub mod message_log;
pub mod selection;
pub mod side_workflows;
pub mod steps;
pub mod workflow;

pub use error::{Action, ValidationError, WorkflowError};
pub use gateway::{DataGateway, GatewayError, Resource};
pub use http_gateway::{HttpGateway, HttpGatewayConfig};
pub use message_log::{Notice, Presenter, Severity};
pub use workflow::{PackagingWorkflow, WorkflowConfig, WorkflowSnapshot};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
