//! Configuration
//!
//! YAML loading, validation and the compiled per-scope directive tree.

pub mod loader;
pub mod schema;
pub mod scope;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::GatewayConfig;
pub use scope::{BlockRule, ScopeConfig, ScopeTree};
pub use validation::{ValidationResult, Validator};
