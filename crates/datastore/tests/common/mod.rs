pub mod fixtures;
pub mod helpers;

pub use helpers::{GatedBackend, RecordingMetrics, SqliteContext, TestContext};
