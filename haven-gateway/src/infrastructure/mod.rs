pub mod auth;
pub mod collaborators;
pub mod offline_queue;

pub use auth::JwtAuthenticator;
