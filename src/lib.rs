//! kvdb: a concurrent in-memory key-value database.
//!
//! Keys are strings, values are byte arrays. Besides plain reads and writes
//! the database offers atomic multi-key operations and `get_when`, a read
//! that blocks until another key holds a given value.
//!
//! # Architecture
//!
//! - **Storage**: three interchangeable backends behind [`store::KeyValueDb`]
//! - **Network**: a length-prefixed binary protocol over TCP, served by a
//!   tokio accept loop that hands requests to an elastic worker pool
//! - **Client**: a synchronous client that multiplexes concurrent requests
//!   over one connection, plus a line-oriented command language for the REPL
//! - **Tester**: a multi-threaded benchmark harness that writes CSV reports
//!
//! # Modules
//!
//! - [`cli`]: Logging and configuration helpers for the binaries
//! - [`client`]: Network client and REPL command runner
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`protocol`]: Wire messages and their framing
//! - [`server`]: TCP server, authentication and worker pool
//! - [`store`]: Storage backends
//! - [`tester`]: Benchmark harness

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;
pub mod tester;
