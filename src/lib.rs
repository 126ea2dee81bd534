//! Sprint Storage - sprint-planning backend with a retry-safe write path
//!
//! Projects, sprints, stories, dependencies, notes, file references and
//! agent-session logs in one SQLite database, served as a JSON HTTP API.
//!
//! ## Write Path
//!
//! | Concern | Component |
//! |---------|-----------|
//! | Retried writes replay instead of re-applying | `services::idempotency` |
//! | `blocked` follows the dependency graph | `services::graph` |
//! | Multi-story moves and patches | `services::batch` |
//! | History of every mutation | `services::audit` + `pagination` |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/sprint-storage/
//! ├── sprint.db              # SQLite database (WAL)
//! └── config.toml            # Configuration
//! ```

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod pagination;
pub mod services;

// Re-exports
pub use api::{Api, ApiRequest, Route};
pub use config::Config;
pub use db::SprintDb;
pub use error::StorageError;
pub use http::HttpServer;
pub use services::{ApiResponse, RequestContext};
