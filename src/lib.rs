//! Tapwire is a streaming reverse proxy that records every exchange.
//!
//! Each inbound request is routed by path prefix to one upstream base URL,
//! forwarded with a filtered header set, and the upstream response is
//! relayed to the client chunk by chunk as it arrives. A copy of the body is
//! kept so that, once the response completes, the full exchange can be
//! appended to a log store without holding up the client.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, init, validate, health, logs).
//! - [`config`] -- Configuration loading and validation via the
//!   [`ConfigSource`](config::ConfigSource) trait.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`health`] -- `GET /_tapwire/health` endpoint returning runtime diagnostics.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`proxy`] -- Request handling: the route tree, header filtering, and the
//!   streaming relay state machine.
//! - [`recorder`] -- Exchange records and the asynchronous log store writer.
//! - [`server`] -- Axum server setup, shared application state, HTTP client, and
//!   graceful shutdown.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `sqlite` | SQLite exchange log store and the `logs` command _(enabled by default)_ |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod proxy;
pub mod recorder;
pub mod server;
