//! STRATA Core Types
//!
//! Pure types shared by every STRATA crate: view keys, table reference
//! naming, run identifiers and the common error type. No I/O lives here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod key;
pub mod mapping;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::RunId;
pub use key::{NAME_SEPARATOR, ViewKey};
pub use mapping::TableReferenceMapping;
