// Engine orchestration: batch processing, origin swaps and revert.

pub mod claims;
pub mod orchestrator;
pub mod revert;
pub mod stats;
pub mod swap;
