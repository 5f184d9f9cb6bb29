// Runtime wiring for one application context
pub mod config;
pub mod context;
pub mod logging;
pub mod mutation;

// Re-exports for consumers
pub use config::{Config, ConfigError};
pub use context::{ContextError, SyncContext, SyncContextBuilder};
pub use mutation::MenuTarget;
