//! Runtime library for visual flow scenarios
//!
//! This crate evaluates graphs of typed nodes placed on a canvas. Two node
//! models share one boot/evaluate lifecycle:
//!
//! - Blocks, which evaluate to a value and branch on its truthiness into a
//!   "true" and a "false" set of successors
//! - Components, which exchange typed signals through named input and output
//!   anchors
//!
//! Around them sit a registry of node types, a graph index over one run's
//! nodes, a scheduler that drives a scenario from its entrance blocks to
//! completion, and a persistence bridge that stores each block's result per
//! scope so that the next run can compare against it.
//!
//! # Example
//!
//! The typical flow for using this crate involves:
//! 1. Building a [`registry::NodeRegistry`] with the node types you need
//! 2. Loading a [`scenario::Scenario`] (or [`session::Session`]) from its document
//! 3. Running it and reading the [`scenario::RunReport`]
//! 4. Saving the results snapshot for the next run

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for standalone logging to the terminal.
///
/// Output goes to stderr; the level is controlled by the `RUST_LOG`
/// environment variable and defaults to `info`.
///
/// Libraries embedding the runtime should not call this. The `log` feature
/// of `tracing` forwards events to whatever `log` backend the host has set up.
///
/// # Examples
///
/// ```ignore
/// // RUST_LOG=scenario_runtime=trace shows every boot and evaluation
/// scenario_runtime::init_tracing();
/// ```
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

pub mod block;
pub mod component;
pub mod events;
pub mod graph;
pub mod node;
pub mod persistence;
pub mod registry;
pub mod scenario;
pub mod session;
