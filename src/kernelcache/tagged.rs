//! Kernel pointer tagging.
//!
//! Packed arrays inside a kernelcache store kernel pointers with their top 16
//! bits either cleared or repurposed as a tag. [`TaggedPointer`] is the raw
//! on-disk value; [`KernelVirtualAddress`] is a canonical kernel address. The
//! two are kept apart so a tagged value can't be dereferenced by accident.

use std::fmt;

/// Mask selecting the top 16 bits of a 64-bit pointer.
pub const TAG_PTR_MASK: u64 = 0xFFFF_0000_0000_0000;

/// Mask selecting the low 48 address bits.
pub const ADDR_MASK_48BIT: u64 = !TAG_PTR_MASK;

/// A raw 64-bit value whose top 16 bits carry a tag rather than address bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaggedPointer(pub u64);

impl TaggedPointer {
    /// Wraps a raw on-disk value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns true for a zero entry.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the 16-bit tag (`p >> 48`).
    #[inline]
    pub const fn tag(self) -> u16 {
        (self.0 >> 48) as u16
    }

    /// Rebuilds a canonical kernel pointer from the 48-bit payload, forcing
    /// the top 16 bits to all-ones.
    #[inline]
    pub const fn untag(self) -> KernelVirtualAddress {
        KernelVirtualAddress((self.0 & ADDR_MASK_48BIT) | TAG_PTR_MASK)
    }

    /// Reconstitutes a kernel pointer by OR-ing in the tag mask.
    ///
    /// Only equivalent to [`untag`](Self::untag) when the top 16 bits were
    /// zero, which is how packed load-address arrays store them.
    #[inline]
    pub const fn with_tag_mask(self) -> KernelVirtualAddress {
        KernelVirtualAddress(self.0 | TAG_PTR_MASK)
    }
}

impl fmt::LowerHex for TaggedPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A canonical kernel virtual address (top 16 bits all-ones), or the
/// [`NONE`](Self::NONE) sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KernelVirtualAddress(pub u64);

impl KernelVirtualAddress {
    /// Sentinel for kexts linked into the kernel itself, which have no
    /// separately relocatable load address.
    pub const NONE: Self = Self(0);

    /// Wraps an address.
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the address as a plain integer.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns true for the [`NONE`](Self::NONE) sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns true if the top 16 bits are all ones.
    #[inline]
    pub const fn is_canonical(self) -> bool {
        self.0 & TAG_PTR_MASK == TAG_PTR_MASK
    }
}

impl fmt::Display for KernelVirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for KernelVirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
