//! molbridge - a crash-isolated, timeout-bounded bridge between a browser
//! client and a chemical file format converter.
//!
//! Every client connection gets a [`dispatcher::Dispatcher`] that owns a pool
//! of worker subprocesses. A request that crashes its worker fails on its
//! own; a request that overruns its deadline takes the whole pool down and a
//! fresh one takes its place.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod operations;
pub mod server;
pub mod version;
pub mod worker;
