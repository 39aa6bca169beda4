pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod schema;
pub mod snapshot;
pub mod topk;
pub mod vector;

pub use config::{Config, TableConfig};
pub use engine::{SimTable, TableStats};
pub use error::{Result, SimError};
pub use snapshot::SharedTable;
pub use topk::Neighbor;

/// Caller-assigned document identifier. Its flat-buffer marker is `id + 1`.
pub type DocId = u32;
