mod auth;
mod backend;
mod credentials;
mod error;
mod orchestrator;
mod panel;
mod poller;
mod schedule;

pub use auth::*;
pub use backend::*;
pub use credentials::*;
pub use error::*;
pub use orchestrator::*;
pub use panel::*;
pub use poller::*;
pub use schedule::*;
