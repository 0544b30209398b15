//! SQLite-backed result store.
//!
//! One database holds the entity registry, detection summaries, and the
//! full per-period timelines of both methods. Each flush is one transaction,
//! so readers never see a partial batch.

pub mod error;
pub mod export;
pub mod schema;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use export::{export_leaderboard, export_leaderboard_file, leaderboard_filename};
pub use sqlite::SqliteStore;
