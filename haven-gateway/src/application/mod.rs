pub mod connection;
pub mod handlers;
pub mod heartbeat;

pub use connection::ConnectionService;
pub use handlers::{Collaborators, EventPolicy, GatewayEventHandler, SessionContext};
pub use heartbeat::{HeartbeatHandle, HeartbeatReport, HeartbeatService};
