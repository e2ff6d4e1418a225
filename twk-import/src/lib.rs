pub mod bcf;
pub mod ingest;
pub mod vcf;

pub use ingest::{ImportConfig, IngestOutcome, IngestStats, Pipeline};
