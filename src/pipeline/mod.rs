pub mod aggregator;
pub mod enrichment;
pub mod extraction;
pub mod structuring;

pub use aggregator::{AggregatorError, RecordAggregator, UploadedFile};
