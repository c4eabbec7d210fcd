pub mod backfill;
pub mod document;
pub mod error;
pub mod storage;
pub mod store;
pub mod trigger;

pub use backfill::{run_backfill, BackfillSummary};
pub use document::Document;
pub use error::{RatingDbError, Result};
pub use store::{ReviewEvent, Store};
pub use trigger::{classify, rating_of, Delta};
