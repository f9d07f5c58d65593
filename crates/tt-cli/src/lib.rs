//! tt-cli: Command-line interface for Tether
//!
//! Provides the `tether` binary: connect to a profile and keep its tunnels
//! open, inspect profiles and forwarded ports, manage stored secrets.

pub mod commands;
pub mod output;
