//! # OpenSoul
//!
//! Swap an AI agent's personality document ("soul") for one from a shared
//! registry, and safely undo the swap.
//!
//! The client side resolves a user-supplied token into a document, writes
//! it through a swap engine that preserves a single backup of the genuine
//! original, and remembers every fetch in a local cache. The registry side
//! assigns stable identifiers to uploaded souls, maintains rating and
//! download statistics, and persists document bytes through a hand-rolled
//! signed object-storage client.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────────┐
//! │ Resolver │──▶│  Cache  │──▶│ Swap Engine  │   client (soul CLI)
//! └────┬─────┘   └─────────┘   └──────────────┘
//!      │ HTTP
//! ┌────▼─────┐   ┌──────────┐   ┌─────────────┐
//! │  Server  │──▶│ Registry │──▶│   SQLite    │   registry (soul serve)
//! └────┬─────┘   └──────────┘   └─────────────┘
//!      │
//! ┌────▼────────────┐
//! │ Signed Storage  │  S3-compatible endpoint (R2, MinIO, S3)
//! └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with explicit defaults |
//! | [`models`] | Shared data types |
//! | [`swap`] | Swap / backup / rollback engine |
//! | [`cache`] | Local cache of fetched souls |
//! | [`resolve`] | Token resolution (path → cache → registry) |
//! | [`storage`] | Signed object-storage client (SigV4, no SDK) |
//! | [`registry`] | Identity, ratings, and ranking |
//! | [`server`] | Registry HTTP server |
//! | [`client`] | Registry HTTP client |

pub mod apply;
pub mod cache;
pub mod cache_cmd;
pub mod client;
pub mod config;
pub mod db;
pub mod migrate;
pub mod models;
pub mod publish;
pub mod registry;
pub mod resolve;
pub mod search;
pub mod server;
pub mod storage;
pub mod swap;
