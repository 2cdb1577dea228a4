//! Mach-O constants used when reading kernelcaches.

use bitflags::bitflags;

// =============================================================================
// Magic Numbers
// =============================================================================

/// 64-bit Mach-O magic (little-endian host order).
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;
/// 64-bit Mach-O magic, byte-swapped.
pub const MH_CIGAM_64: u32 = 0xCFFAEDFE;
/// 32-bit Mach-O magic.
pub const MH_MAGIC: u32 = 0xFEEDFACE;
/// Universal (fat) binary magic.
pub const FAT_MAGIC: u32 = 0xCAFEBABE;

// =============================================================================
// File Types
// =============================================================================

/// Demand paged executable file (classic prelinked kernelcache).
pub const MH_EXECUTE: u32 = 0x2;
/// Dynamically bound shared library.
pub const MH_DYLIB: u32 = 0x6;
/// Kernel extension bundle.
pub const MH_KEXT_BUNDLE: u32 = 0xB;
/// Set of Mach-Os (fileset kernelcache).
pub const MH_FILESET: u32 = 0xC;

/// Returns a short name for a Mach-O file type.
pub fn filetype_name(filetype: u32) -> &'static str {
    match filetype {
        MH_EXECUTE => "execute",
        MH_DYLIB => "dylib",
        MH_KEXT_BUNDLE => "kext bundle",
        MH_FILESET => "fileset",
        _ => "other",
    }
}

// =============================================================================
// CPU Types
// =============================================================================

/// Mask for 64-bit architectures.
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
/// ARM CPU type.
pub const CPU_TYPE_ARM: u32 = 12;
/// ARM64 CPU type.
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
/// x86 CPU type.
pub const CPU_TYPE_X86: u32 = 7;
/// x86_64 CPU type.
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
/// ARM64e (pointer authentication).
pub const CPU_SUBTYPE_ARM64E: u32 = 2;

// =============================================================================
// Load Commands
// =============================================================================

/// Flag for load commands that dyld must understand.
pub const LC_REQ_DYLD: u32 = 0x8000_0000;
/// 64-bit segment.
pub const LC_SEGMENT_64: u32 = 0x19;
/// UUID.
pub const LC_UUID: u32 = 0x1B;
/// Fileset entry (kernel collections).
pub const LC_FILESET_ENTRY: u32 = 0x35 | LC_REQ_DYLD;

// =============================================================================
// Kernelcache Sections
// =============================================================================

/// Segment holding the prelink plist and kmod arrays.
pub const SEG_PRELINK_INFO: &str = "__PRELINK_INFO";
/// Prelink info dictionary (XML property list).
pub const SECT_PRELINK_INFO: &str = "__info";
/// Packed array of kext load addresses.
pub const SECT_KMOD_START: &str = "__kmod_start";
/// Packed array of pointers to `kmod_info` records.
pub const SECT_KMOD_INFO: &str = "__kmod_info";
/// Read-only data segment.
pub const SEG_DATA_CONST: &str = "__DATA_CONST";
/// Text segment.
pub const SEG_TEXT: &str = "__TEXT";
/// Constant section name shared by `__TEXT` and `__DATA_CONST`.
pub const SECT_CONST: &str = "__const";

// =============================================================================
// Header Flags
// =============================================================================

bitflags! {
    /// Mach-O header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MachOFlags: u32 {
        /// The object file has no undefined references
        const NOUNDEFS = 0x1;
        /// The object file is the output of an incremental link
        const INCRLINK = 0x2;
        /// The object file is input for the dynamic linker
        const DYLDLINK = 0x4;
        /// The image is using two-level name space bindings
        const TWOLEVEL = 0x80;
        /// The final linked image contains external weak symbols
        const WEAK_DEFINES = 0x8000;
        /// The final linked image uses weak symbols
        const BINDS_TO_WEAK = 0x10000;
        /// The OS will load the main executable at a random address
        const PIE = 0x200000;
        /// The binary has no reexported dylibs
        const NO_REEXPORTED_DYLIBS = 0x100000;
        /// The dylib is part of the dyld shared cache
        const DYLIB_IN_CACHE = 0x80000000;
    }
}
