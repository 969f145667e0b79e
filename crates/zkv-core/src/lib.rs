pub mod config;
pub mod error;

pub use config::ZkvConfig;
pub use error::{ZkvError, ZkvResult};
