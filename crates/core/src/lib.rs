//! Core domain layer for the FLUX job orchestration platform.
//!
//! Pure data and validation: job kinds, typed parameter sets, the
//! internal image tensor representation, and credential loading.
//! No network I/O happens in this crate.

pub mod config;
pub mod params;
pub mod tensor;
