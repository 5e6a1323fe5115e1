//! Domain layer: models and ports

pub mod availability;
pub mod callback;
pub mod destination;
pub mod event;
pub mod ports;
pub mod shared;
pub mod transfer;
