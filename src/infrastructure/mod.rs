//! Infrastructure layer: protocol client and external collaborators

pub mod directory;
pub mod esl;
pub mod notifier;
pub mod ticketing;
