pub mod overwrite;

// Re-export the overwrite implementation
pub use overwrite::{OverwriteReport, PassReport, PatternOverwrite};
