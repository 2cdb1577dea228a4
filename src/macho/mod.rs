//! Mach-O file format handling.
//!
//! This module provides a read-only Mach-O reader sufficient to navigate
//! kernelcaches: header, segments, sections, UUID and fileset entries, plus
//! the [`ImageAccessor`] seam the kernelcache decoders use.

mod accessor;
mod constants;
mod context;
mod structs;

#[cfg(test)]
pub(crate) mod testutil;

pub use accessor::*;
pub use constants::*;
pub use context::*;
pub use structs::*;
