//! Interface layer - external HTTP surface

pub mod api;
