//! Concrete readiness probes and setup actions.
//!
//! - **Probes**: TCP connect ([`TcpProbe`]), HTTP 2xx ([`HttpProbe`]),
//!   command exit status ([`CommandProbe`])
//! - **Actions**: command ([`CommandAction`]), RabbitMQ topology via the
//!   management API ([`TopologyAction`])

pub mod command;
pub mod endpoint;
pub mod http;
pub mod process;
pub mod rabbitmq;
pub mod tcp;

pub use command::{CommandAction, CommandProbe, EmptyCommand};
pub use endpoint::{Endpoint, EndpointError, default_port, redact_userinfo};
pub use http::{HttpProbe, HttpSetupError};
pub use rabbitmq::{BindingSpec, ExchangeSpec, QueueSpec, Topology, TopologyAction};
pub use tcp::TcpProbe;
