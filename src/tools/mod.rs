//! Query tool implementations backing the MCP surface.

pub mod references;
pub mod search;
pub mod status;

pub use references::{find_usages, get_symbol_references};
pub use search::{find_symbol, search_code};
pub use status::{get_index_status, reindex_repository};
