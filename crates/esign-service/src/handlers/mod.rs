//! Route handlers.

pub mod documents;
pub mod owner;
pub mod signing;
