pub mod ld;
pub mod merge;
pub mod sort;

pub use merge::{sort_merge, DEFAULT_MERGE_FLUSH_LIMIT};
pub use sort::{sort, SortConfig, SortOutcome};
