//! Port traits: the boundary between the analytics core and its inputs.

pub mod config_port;
pub mod data_port;
