//! The narrow image interface the kernelcache decoders are written against.
//!
//! Decoders only need section bytes, address translation, raw reads, C-string
//! reads and the image base; anything that can answer those questions can be
//! inspected, whatever Mach-O parser sits underneath.

use super::context::MachOContext;
use crate::error::{Error, Result};

/// Read-only access to a loaded binary image.
pub trait ImageAccessor {
    /// Returns the file-backed bytes of `segment,section`, or `None` if the
    /// image has no such section.
    fn section_bytes(&self, segment: &str, section: &str) -> Result<Option<&[u8]>>;

    /// Translates a virtual address to a file offset.
    fn get_offset(&self, addr: u64) -> Result<u64>;

    /// Reads up to `buf.len()` bytes at a file offset, returning how many were
    /// read. Reads at or past end of file are short, down to 0 bytes.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Reads a NUL-terminated string at a virtual address.
    fn get_cstring(&self, addr: u64) -> Result<String>;

    /// Returns the image base load address.
    fn base_address(&self) -> u64;

    /// Like [`section_bytes`](Self::section_bytes), but a missing section is
    /// [`Error::SectionMissing`].
    fn require_section(&self, segment: &str, section: &str) -> Result<&[u8]> {
        self.section_bytes(segment, section)?
            .ok_or_else(|| Error::section_missing(segment, section))
    }
}

impl<D: AsRef<[u8]>> ImageAccessor for MachOContext<D> {
    fn section_bytes(&self, segment: &str, section: &str) -> Result<Option<&[u8]>> {
        match self.section(segment, section) {
            Some(sect) => self.section_data(sect).map(Some),
            None => Ok(None),
        }
    }

    fn get_offset(&self, addr: u64) -> Result<u64> {
        self.addr_to_offset(addr)
            .ok_or_else(|| Error::address_not_mapped(addr))
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.as_bytes();
        let Some(tail) = usize::try_from(offset).ok().and_then(|start| data.get(start..)) else {
            return Ok(0);
        };
        let n = buf.len().min(tail.len());
        buf[..n].copy_from_slice(&tail[..n]);
        Ok(n)
    }

    fn get_cstring(&self, addr: u64) -> Result<String> {
        self.cstring_at(addr)
    }

    fn base_address(&self) -> u64 {
        MachOContext::<D>::base_address(self)
    }
}
