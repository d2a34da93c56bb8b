//! STRATA Planner
//!
//! Turns view sources into a validated dependency graph: view variants,
//! dependency extraction, source discovery, the DAG with its pull-based
//! scheduling protocol, and pattern selection.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dag;
pub mod extract;
pub mod select;
pub mod source;
pub mod validate;
pub mod view;

pub use dag::Dag;
pub use extract::{DependencyExtractor, ScriptExtractor, SqlExtractor};
pub use select::{Pattern, Target};
pub use source::{RESERVED_SCHEMAS, discover, without_reserved};
pub use validate::find_cycle;
pub use view::{QueryView, ScriptView, View, ViewKind};
