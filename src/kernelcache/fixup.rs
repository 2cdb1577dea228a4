//! Kernelcache chained-fixup rebases.
//!
//! Prelinked kernelcaches store internal pointers as
//! `DYLD_CHAINED_PTR_64_KERNEL_CACHE` rebases: a 30-bit offset from the base
//! of a kernel collection plus chaining and pointer-authentication metadata.

use tracing::trace;

use super::tagged::KernelVirtualAddress;
use crate::error::{Error, Result};

/// `dyld_chained_ptr_64_kernel_cache_rebase`.
///
/// Layout (LSB first):
/// - `target`:     30 bits, offset from the collection base
/// - `cacheLevel`:  2 bits, which kernel collection the target lives in
/// - `diversity`:  16 bits
/// - `addrDiv`:     1 bit
/// - `key`:         2 bits
/// - `next`:       12 bits, stride to the next fixup in the chain
/// - `isAuth`:      1 bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainedPtr64KernelCacheRebase(pub u64);

impl ChainedPtr64KernelCacheRebase {
    /// Returns the base-relative target offset.
    #[inline]
    pub fn target(&self) -> u64 {
        self.0 & 0x3FFF_FFFF
    }

    /// Returns the kernel collection level the target belongs to.
    #[inline]
    pub fn cache_level(&self) -> u8 {
        ((self.0 >> 30) & 0x3) as u8
    }

    /// Returns the pointer-authentication diversity.
    #[inline]
    pub fn diversity(&self) -> u16 {
        ((self.0 >> 32) & 0xFFFF) as u16
    }

    /// Returns true if address diversity is used.
    #[inline]
    pub fn addr_div(&self) -> bool {
        (self.0 >> 48) & 1 != 0
    }

    /// Returns the pointer-authentication key.
    #[inline]
    pub fn key(&self) -> u8 {
        ((self.0 >> 49) & 0x3) as u8
    }

    /// Returns the stride to the next fixup in the chain.
    #[inline]
    pub fn next(&self) -> u16 {
        ((self.0 >> 51) & 0xFFF) as u16
    }

    /// Returns true if this is an authenticated pointer.
    #[inline]
    pub fn is_auth(&self) -> bool {
        (self.0 >> 63) & 1 != 0
    }
}

/// Resolves on-disk kernelcache rebases against an image base address.
#[derive(Debug, Clone, Copy)]
pub struct FixupAdapter {
    base: u64,
}

impl FixupAdapter {
    /// Creates an adapter for an image loaded at `base`.
    pub fn new(base: u64) -> Self {
        Self { base }
    }

    /// Converts a raw rebase into an absolute virtual address.
    ///
    /// Only the base collection (cache level 0) is loaded, so a rebase into an
    /// auxiliary collection cannot be resolved.
    pub fn resolve(&self, raw: u64) -> Result<KernelVirtualAddress> {
        let rebase = ChainedPtr64KernelCacheRebase(raw);

        if rebase.cache_level() != 0 {
            return Err(Error::FixupDecode {
                raw,
                reason: "target is in an auxiliary kernel collection",
            });
        }

        let addr = self
            .base
            .checked_add(rebase.target())
            .ok_or(Error::FixupDecode {
                raw,
                reason: "target overflows the address space",
            })?;

        trace!(
            "Rebase {:#018x} -> {:#x} (auth: {}, next: {})",
            raw,
            addr,
            rebase.is_auth(),
            rebase.next()
        );

        Ok(KernelVirtualAddress(addr))
    }
}
