pub mod error;
pub mod keys;
pub mod types;

pub use error::{ItemResult, Result, StoreError};
pub use types::{IndexKind, SampleRecord, SampleRef, Scope};
