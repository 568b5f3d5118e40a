pub mod http;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod server;
pub mod socket;

pub use registry::ConnectionRegistry;
pub use presence::PresenceTracker;
pub use server::{start, AppState, ServerConfig, ServerHandle};
