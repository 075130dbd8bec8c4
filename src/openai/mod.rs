mod core;
pub mod error;
pub mod sse;

pub use self::core::*;
pub use error::GenerateError;
