//! Parallel, resumable search for tight clusters of aligned nether-fortress
//! bridge crossings.
//!
//! The oracle answers "where are the fortress pieces"; everything else here
//! turns those answers into ranked [`ClusterResult`]s across many threads and
//! keeps the scan restartable.

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod oracle;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod synthetic;

pub use checkpoint::{CheckpointStore, PersistedSettings, ScanCheckpoint};
pub use config::{AppConfig, ScanKind, ScanSettings, DEFAULT_CONFIG};
pub use error::{CheckpointError, OracleError, ScanError};
pub use model::{BlockPos, ClusterResult, Crossing, PatternType, RegionCoord, Seed};
pub use oracle::{Oracle, OracleFactory, OracleParams, Piece, PieceKind, StructureHandle};
pub use progress::{ScanState, Throughput};
pub use scheduler::{Partition, ScanMode};
pub use session::{ProgressReport, ScanHandle, ScanOutcome, ScanSession};
pub use store::ResultStore;
pub use synthetic::SyntheticOracleFactory;
