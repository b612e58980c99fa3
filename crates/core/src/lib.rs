//! # LiveFeed Core
//!
//! Shared building blocks for the LiveFeed services.
//!
//! ## Modules
//!
//! - `config`: Environment configuration loading and validation
//! - `database`: Shared PostgreSQL connection pool
//! - `error`: Error types
//! - `observability`: Structured logging bootstrap
//! - `pagination`: Opaque cursor tokens over compound sort keys

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod pagination;

pub use config::{load_dotenv, parse_env_var, ConfigLoader, RedisConfig, ServiceConfig};
pub use database::{DatabaseConfig, DatabaseHealth, DatabasePool};
pub use error::LiveFeedError;
pub use observability::{init_logging, LogConfig, LogFormat};
pub use pagination::{
    decode_cursor, encode_cursor, CursorPosition, CursorPredicate, Page, PaginationError,
    SortDirection, SortField, SortKey, SortSpec, DEFAULT_PAGE_SIZE,
};

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, LiveFeedError>;
