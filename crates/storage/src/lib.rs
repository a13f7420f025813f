#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod fsio;
pub mod layout;
mod store;

pub use layout::ProjectLayout;
pub use store::*;
