mod compute;
mod error;
mod token;

pub use compute::*;
pub use error::*;
pub use token::*;

#[cfg(test)]
mod fake;
