pub mod capability;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use capability::{Capability, CapabilityRegistry, CapabilitySpec};
pub use config::AppConfig;
pub use error::{BatchflowError, Result};
pub use types::*;
