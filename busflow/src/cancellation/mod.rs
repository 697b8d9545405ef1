//! Cooperative cancellation for background loops.

mod token;

pub use token::CancellationToken;
