//! Embedded semantic-graph storage engine.
//!
//! Elements (nodes, content links and typed connectors) live in append-only
//! channel files with in-memory tables replayed on open. Traversal goes
//! through the seven-shape [`storage::TripleIter`]; declarative matching and
//! instantiation go through [`template::Template`].
//!
//! ```no_run
//! use semgraph::storage::{Store, StoreOptions, TripleIter};
//! use semgraph::types::ElementType;
//!
//! # fn main() -> semgraph::types::Result<()> {
//! let store = Store::open(StoreOptions::new("./repo"))?;
//! let class = store.create_node(ElementType::NODE_CONST)?;
//! let item = store.create_node(ElementType::NODE_CONST)?;
//! store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, class, item)?;
//! for [src, conn, tgt] in
//!     TripleIter::f_a_a(&store, class, ElementType::EDGE_ACCESS, ElementType::NODE)
//! {
//!     println!("{src} -{conn}-> {tgt}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod storage;
pub mod template;
pub mod types;

pub use storage::{Store, StoreOptions, Triple, TripleIter};
pub use template::{Template, TemplateItem, TemplateParams};
pub use types::{ElementId, ElementType, Result, StoreError};
