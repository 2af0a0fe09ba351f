pub mod config;
pub mod error;
pub mod features;
pub mod score;
pub mod transaction;

pub use config::EngineSettings;
pub use error::*;
pub use features::*;
pub use score::*;
pub use transaction::*;
