mod config;
mod error;
mod state;

pub use config::*;
pub use error::*;
pub use state::*;
