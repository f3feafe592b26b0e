//! Storage engine: element records, typed adjacency, content dictionaries
//! and the basic triple iterator.
//!
//! The [`Store`] owns four channel files (element records, connector endpoint
//! pairs and two write-through adjacency directions) plus the content
//! dictionaries; everything queryable is mirrored in memory and replayed from
//! the records on open.

mod adjacency;
mod channel;
mod content;
mod iter;
mod options;
mod refs;
mod store;

pub use iter::{IterParam, Triple, TripleIter, TripleKind};
pub use options::StoreOptions;
pub use store::Store;
