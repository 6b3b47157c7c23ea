/// Common test utilities and mock infrastructure
///
/// This module provides shared functionality for integration tests including:
/// - Scripted hdparm responses with a call log
/// - File-backed and in-memory test disks
/// - Recording alert and finalizer doubles

pub mod doubles;
pub mod mock_commands;
pub mod mock_drive;
