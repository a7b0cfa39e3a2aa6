//! Plan domain model
//!
//! This module contains the project plan data structures:
//! - `node`: nodes, priorities, statuses, code blocks and import directives
//! - `document`: a tree of entries for one file or a merged tree, with queries
//! - `ids`: identifier generation for nodes created without one
//! - `serde_impl`: the JSON mirror of the document format

mod document;
pub mod ids;
mod node;
mod serde_impl;

// Re-export all public types
pub use document::{Document, FORMAT_VERSION};
pub use node::{CodeBlock, Entry, ImportDirective, Node, Priority, Status};
