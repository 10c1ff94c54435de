// Error taxonomy
pub mod error;

// Secret cipher, credential store, token vault
pub mod credentials;

// OAuth authorization-code / refresh lifecycle
pub mod oauth;

// Provider contract and registry
pub mod provider;

// Authenticated REST client with rate-limit tracking
pub mod platform;

// Database, deployment, project and env-var managers
pub mod resources;

// Concrete provider implementations
pub mod providers;

// TOML configuration
pub mod config;

pub use error::{CloudError, Result};
pub use provider::{CloudProvider, ProviderRegistry};
