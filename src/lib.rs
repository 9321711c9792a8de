// Main library file for the holiday offer search backend

// Data model and row parsing
pub mod models;
pub mod record;

// Ingestion pipeline
pub mod importer;
pub mod ingest;

// Search
pub mod filter;
pub mod storage;

// Storage backends
pub mod memory_store;
pub mod partition;
pub mod partitioned_store;
pub mod retry;

pub mod config;
pub mod sample;

// Re-export key types for convenience
pub use config::{AppConfig, BackendKind};
pub use filter::FilterPredicate;
pub use importer::DataImporter;
pub use ingest::{IngestConfig, IngestCounts, IngestError, IngestReport, Ingestor, RowError};
pub use memory_store::MemoryStore;
pub use models::{Hotel, HotelId, HotelWithBestOffer, Offer};
pub use partition::{Consistency, LocalPartitionStore, PartitionClient};
pub use partitioned_store::{ImportSummary, PartitionedConfig, PartitionedStore};
pub use record::{HotelParser, MalformedRecord, OfferColumns, OfferParser, RecordParser};
pub use retry::RetryConfig;
pub use storage::{OfferStore, SharedStore, StorageError, StoreStats};
