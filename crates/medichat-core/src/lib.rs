pub mod auth;
pub mod error;
pub mod events;
pub mod identity;
pub mod ids;
pub mod model;

pub use auth::{AuthRejection, TokenVerifier};
pub use error::ChatError;
pub use identity::{Identity, Role};
