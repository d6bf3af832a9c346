//! Chunked recovery logs: the record codec, plain logs and the catalog that
//! strings plain logs together.

pub mod catalog;
pub(crate) mod handle;
pub mod header;
pub mod plain;
pub mod record;
pub mod replay;

pub use catalog::{Catalog, CatalogStat, ChildRef};
pub use header::{Bitmap, LogHeader};
pub use plain::{CancelOutcome, PlainLog, RecordStream};
pub use record::Record;
pub use replay::Process;
