//! `placelink-linkage` — Record linkage and temporal fusion engine for UK
//! public place datasets.
//!
//! Pure engine crate: receives pre-loaded records, returns enriched records
//! and run statistics. No CLI or network dependencies.

pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod join;
pub mod model;
pub mod normalize;
pub mod spatial;

pub use config::Config;
pub use diff::compare_snapshots;
pub use engine::{load_csv_records, run, RecordSource};
pub use error::{LinkError, SourceError};
pub use model::{ChangeSet, PipelineResult, Record};
