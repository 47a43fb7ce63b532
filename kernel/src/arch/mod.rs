//! Architecture support
//!
//! Everything CPU-specific lives under here. Only AArch64 is supported; the
//! few entry points the rest of the kernel needs are re-exported at this
//! level.

pub mod aarch64;

pub use aarch64::halt;
