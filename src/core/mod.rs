//! Core infrastructure: configuration and time sourcing.

pub mod config;
pub mod time;
