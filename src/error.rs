//! Error types for kernelcache inspection.
//!
//! Every error here is fatal to the operation that raised it: readers never
//! return partial catalogs, and nothing is retried internally.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for kernelcache operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Mach-O Errors ====================
    #[error("invalid Mach-O magic: {0:#x}")]
    InvalidMachoMagic(u32),

    #[error("load command at offset {offset:#x} extends beyond header")]
    LoadCommandOverflow { offset: usize },

    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("C string at {addr:#x} is not terminated before end of file")]
    UnterminatedString { addr: u64 },

    // ==================== Kernelcache Errors ====================
    #[error("section {segment}.{section} not found")]
    SectionMissing { segment: String, section: String },

    #[error("address {addr:#x} is not mapped by any segment")]
    AddressNotMapped { addr: u64 },

    #[error("kmod_info record at offset {offset:#x} truncated: need {needed} bytes, have {available}")]
    RecordTruncated {
        offset: u64,
        needed: usize,
        available: usize,
    },

    #[error("failed to decode chained fixup {raw:#018x}: {reason}")]
    FixupDecode { raw: u64, reason: &'static str },

    #[error("failed to decode prelink info: {reason}")]
    PlistDecode { reason: String },

    #[error("bundle '{bundle_id}' has ModuleIndex {index}, but only {count} kext start addresses exist")]
    IndexOutOfRange {
        bundle_id: String,
        index: u64,
        count: usize,
    },
}

/// A specialized Result type for kernelcache operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if the error means the requested data is absent from
    /// the image, as opposed to the image being malformed.
    ///
    /// Transport layers use this to pick between "not found" and a generic
    /// failure.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::SectionMissing { .. })
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a section missing error.
    #[inline]
    pub fn section_missing(segment: &str, section: &str) -> Self {
        Error::SectionMissing {
            segment: segment.to_string(),
            section: section.to_string(),
        }
    }

    /// Creates an address not mapped error.
    #[inline]
    pub fn address_not_mapped(addr: u64) -> Self {
        Error::AddressNotMapped { addr }
    }

    /// Creates a plist decode error from any displayable cause.
    #[inline]
    pub fn plist(reason: impl std::fmt::Display) -> Self {
        Error::PlistDecode {
            reason: reason.to_string(),
        }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Error::BufferTooSmall { needed, available }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(Error::section_missing("__PRELINK_INFO", "__kmod_start").is_not_found());
        assert!(!Error::address_not_mapped(0x1000).is_not_found());
        assert!(!Error::plist("bad").is_not_found());
    }

    #[test]
    fn test_section_missing_message() {
        let err = Error::section_missing("__PRELINK_INFO", "__kmod_start");
        assert_eq!(
            err.to_string(),
            "section __PRELINK_INFO.__kmod_start not found"
        );
    }
}
