pub mod config;
pub mod error;
pub mod event_bus;
pub mod migration;
pub mod paths;
pub mod store;

pub use config::{ConfigStore, EngineConfig, TimeoutsConfig};
pub use error::{AgentTermError, ErrorCategory, Result};
pub use event_bus::EventBus;
pub use migration::{migrate, MigrationReport, CURRENT_SCHEMA_VERSION};
pub use paths::default_state_dir;
pub use store::Store;
