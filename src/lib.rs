//! Multi-repository code intelligence service.
//!
//! Watches a configured set of source repositories, parses each file with a
//! language-appropriate structural extractor, materializes a graph of code
//! entities and relationships, embeds entities for semantic retrieval, and
//! serves queries over MCP. Multiple processes can share one data
//! directory: a file-based lock elects a single writer; the rest serve
//! queries read-only and promote when the writer goes stale.

pub mod config;
pub mod discovery;
pub mod embedding;
pub mod error;
pub mod extractors;
pub mod indexing;
pub mod lock;
pub mod logging;
pub mod mcp;
pub mod model;
pub mod runtime;
pub mod storage;
pub mod tools;
pub mod watcher;

pub use config::Settings;
pub use error::{EmbeddingError, ExtractError, IndexError, IndexResult, StoreError};
pub use model::{CodeEntity, EntityKind, EntityType, RelationType};
pub use runtime::{ServerContext, ServerRuntime};
