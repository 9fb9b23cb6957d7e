//! Server-side engine of a vulnerability-management web console.
//!
//! Bridges HTTP page requests to the stateful XML manager protocol: per
//! request it resolves the effective list filter, batches one or more
//! escaped protocol commands over a single authenticated connection,
//! parses the responses into entity trees, and assembles one enveloped
//! XML document for the page-rendering layer.
//!
//! # Core Components
//!
//! - [`QueryEngine`] - Single and list resource fetches with enrichments
//! - [`ManagerConnection`] - Per-request transport to the manager process
//! - [`filter::resolve`] - Effective-filter resolution for list requests
//! - [`EnvelopeBuilder`] - The outer document handed to the page layer
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vmp_console::{
//!     Credentials, CapabilitySet, EnvelopeBuilder, ManagerConfig, Params, QueryEngine,
//! };
//! use vmp_console::query::FetchManyOptions;
//! use std::time::Instant;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig::Unix { path: "/run/manager.sock".into() };
//! let start = Instant::now();
//! let mut conn = config.connect().await?;
//! let mut creds = Credentials::new("alice", "Admin", CapabilitySet::new(["get_tasks"]));
//!
//! let mut params = Params::new();
//! params.add("filt_id", b"0");
//! let fragment = QueryEngine::new(&mut conn, &mut creds)
//!     .fetch_many("task", &params, FetchManyOptions::default())
//!     .await?;
//! let page = EnvelopeBuilder::new(&creds, start)
//!     .with_params(&params)
//!     .build(&fragment);
//! # Ok(())
//! # }
//! ```
//!
//! The per-resource page handlers are thin call-throughs into
//! [`QueryEngine`]; this crate contains the shared machinery, not the
//! handlers themselves.

pub mod command;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod params;
pub mod query;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use command::{Command, CommandBuilder};
pub use entity::Entity;
pub use envelope::{EnvelopeBuilder, ResponseMetadata, error_envelope};
pub use error::{EngineError, EngineResult, ParseError};
pub use filter::{FILT_ID_NONE, FILT_ID_USER_SETTING, FilterControls, ResolvedFilter};
pub use params::{Param, Params, Validated};
pub use query::{FetchManyOptions, QueryEngine};
pub use session::{CapabilitySet, Credentials};
pub use transport::{ManagerConfig, ManagerConnection, ManagerStream};
