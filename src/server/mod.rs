//! HTTP server for helper dispatch
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             Dispatch Server              │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │             REST API               │  │
//! │  │  GET  /api/health                  │  │
//! │  │  POST /api/bookings                │  │
//! │  │  GET  /api/bookings/{id}           │  │
//! │  │  POST /api/bookings/{id}/complete  │  │
//! │  │  GET  /api/helpers                 │  │
//! │  │  POST /api/helpers                 │  │
//! │  │  PUT  /api/helpers/{id}/location   │  │
//! │  │  GET  /metrics                     │  │
//! │  └────────────────────────────────────┘  │
//! │                    │                     │
//! │                    ▼                     │
//! │  ┌────────────────────────────────────┐  │
//! │  │            Dispatcher              │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use helper_dispatch::server::{DispatchServer, ServerConfig};
//!
//! let server = DispatchServer::new(ServerConfig::default(), dispatcher)?;
//! server.start_with_shutdown(shutdown_signal()).await?;
//! ```

pub mod api;
pub mod config;
#[allow(clippy::module_inception)]
pub mod server;

pub use api::create_router;
pub use config::ServerConfig;
pub use server::{AppState, DispatchServer, ServerError, ServerInfo};
