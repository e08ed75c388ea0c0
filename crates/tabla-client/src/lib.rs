//! Session and data-synchronization layer of the Tabla restaurant client.
//!
//! - [`session`]: login, registration, logout and the access-token lifecycle
//! - [`context`]: explicitly initialized access to the session, and the
//!   application context wiring every component together
//! - [`query`]: request cache with staleness, GC, coalescing and retries
//! - [`optimistic`]: optimistic flag toggles with rollback
//! - [`geo`]: position requests, persisted location, distances
//! - [`restaurants`]: the data service UI actions call

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod geo;
pub mod logging;
pub mod models;
pub mod optimistic;
pub mod query;
pub mod restaurants;
pub mod session;
pub mod storage;
pub mod theme;
pub mod token;

#[cfg(test)]
mod testing;

pub use api::{HttpApi, RestaurantApi};
pub use config::{ClientConfig, ConfigError};
pub use context::{AppContext, AppContextBuilder, AuthContext};
pub use error::{ApiError, ClientError, ErrorKind, Result, StorageError};
pub use query::{LifecycleEvent, QueryCache, QueryKey, QueryState};
pub use restaurants::RestaurantService;
pub use session::{Session, SessionManager, TokenGuard};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use theme::{ThemeMode, ThemePreference, ThemeStore};
pub use token::{TokenRecord, TokenStore};
