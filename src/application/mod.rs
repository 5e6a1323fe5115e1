//! Application services: orchestration over the domain ports

pub mod click_to_call;
pub mod probe;
pub mod resolver;
pub mod scheduler;
pub mod transfer;

pub use click_to_call::{ClickToCallInitiator, OriginateOutcome};
pub use probe::AvailabilityProbe;
pub use resolver::DestinationResolver;
pub use scheduler::CallbackScheduler;
pub use transfer::TransferOrchestrator;
