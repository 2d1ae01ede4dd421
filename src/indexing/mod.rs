//! Indexing: per-file pipeline, queue-driven service, reference resolver.

pub mod language;
pub mod pipeline;
pub mod resolver;
pub mod service;
pub mod text;

pub use language::LanguageDetector;
pub use pipeline::{FileIndexingPipeline, ProcessingResult};
pub use resolver::{ReferenceResolver, ResolutionResult};
pub use service::IndexingService;
pub use text::EmbeddingTextBuilder;
