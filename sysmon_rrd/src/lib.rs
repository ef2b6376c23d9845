//! Fixed-size, multi-resolution round-robin time-series files.
//!
//! Each file holds one series as a list of archive tiers ordered finest to coarsest.
//! Writes land in the finest tier that covers the point's age and are consolidated into
//! every coarser tier with the file's aggregation function, subject to the xff
//! (fraction of known points) threshold.

pub mod aggregation;
pub mod archive;
pub mod database;
pub mod error;

pub use aggregation::Aggregation;
pub use archive::{default_archives, parse_archives, validate_archives, ArchiveSpec};
pub use database::{ArchiveInfo, Database, Header, UpdateOutcome};
pub use error::{RrdError, Result};

/// Default fraction of known points required to consolidate.
pub const DEFAULT_XFF: f32 = 0.5;
