pub mod calendar;
pub mod types;

pub use types::*;
