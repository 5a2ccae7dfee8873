// ABOUTME: Library crate for session-fleet exposing the fleet core, configuration and secret store

#![allow(missing_docs)]

pub mod config;
pub mod credentials;
pub mod fleet;
