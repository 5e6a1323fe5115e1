//! API interface implementations

pub mod callback_handler;
pub mod dto;
pub mod router;

pub use callback_handler::AppState;
pub use router::build_router;
