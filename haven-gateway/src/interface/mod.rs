pub mod websocket;

pub use websocket::{GatewayState, build_router};
