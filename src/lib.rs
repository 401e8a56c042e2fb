//! Localhost HTTP service hosting long-lived, isolated code-execution
//! sessions, each with a persistent Starlark namespace, a virtual working
//! directory, a bounded execution history, and a fixed set of injected
//! filesystem helpers.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod chdir_arbiter;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs_context;
pub mod fs_helpers;
pub mod history;
pub mod http;
pub mod manager;
pub mod repr;
pub mod session;
