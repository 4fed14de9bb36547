// crates/core/src/lib.rs
pub mod dataset;
pub mod error;
pub mod types;

pub use dataset::*;
pub use error::*;
pub use types::*;
