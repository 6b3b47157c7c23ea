// Erase verification through canary markers

pub mod canary;

pub use canary::{canary_offsets, count_canaries, write_canaries, CanaryPattern};
