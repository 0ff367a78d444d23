//! Engine components and the HTTP source adapter
//!
//! Leaves first: rate limiter, page walker, classifier, mapper, extractor,
//! normalizer, batch writer, orchestrator.

pub mod batch_writer;
pub mod category_mapper;
pub mod field_normalizer;
pub mod graphql_client;
pub mod measurement_extractor;
pub mod page_walker;
pub mod rate_limiter;
pub mod sync_orchestrator;
pub mod value_classifier;

pub use batch_writer::{BatchResult, BatchWriter, BatchWriterSettings};
pub use category_mapper::{CategoryMapper, CategoryMapping};
pub use field_normalizer::{parse_timestamp, FieldNormalizer, Normalized};
pub use graphql_client::{GraphQlRecordSource, StaticTokenProvider};
pub use measurement_extractor::MeasurementExtractor;
pub use page_walker::{Page, PageWalker, PageWalkerSettings};
pub use rate_limiter::RateLimiter;
pub use sync_orchestrator::{ScanSummary, SyncOrchestrator};
pub use value_classifier::{ClassificationVerdict, ValueClassifier, VerdictReason};
