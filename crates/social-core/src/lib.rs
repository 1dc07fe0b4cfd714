pub mod config;
pub mod error;
pub mod media;
pub mod model;
pub mod security;
pub mod services;
pub mod store;
pub mod validation;
pub mod views;

pub use config::{
    DatabaseConfig, LogFormat, LoggingConfig, MediaConfig, RateLimitConfig, SecurityConfig,
    ServerConfig, Settings,
};
pub use error::{CoreError, Result};
pub use media::{LocalMediaStore, MediaStore, Upload};
pub use model::*;
pub use security::{AuthContext, Claims, SecurityError, TokenService};
pub use store::{Database, Store};
pub use views::*;
