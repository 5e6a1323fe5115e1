//! Event-socket protocol client

pub mod connection;
pub mod error;
pub mod frame;

pub use connection::{EslConnection, EventCallback};
pub use error::EslError;
pub use frame::Frame;
