//! Handover - call transfer and deferred-callback orchestration core
//!
//! Orchestrates live attended transfers and deferred callbacks for an
//! AI-driven phone attendant, controlling call legs over the switching
//! platform's event socket. Invoked as a library by the voice session and
//! as a service by the scheduled job runner; no CLI surface.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::CoreError;
pub use domain::shared::result::Result;
