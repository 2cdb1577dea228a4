//! `__PRELINK_INFO` kmod arrays.
//!
//! Classic prelinked kernelcaches carry two parallel arrays:
//! - `__kmod_start`: one 8-byte load address per kext, in prelink plist order
//! - `__kmod_info`: one tagged pointer per kext to its `kmod_info_t` record

use std::fmt;

use tracing::{debug, trace};

use super::fixup::FixupAdapter;
use super::tagged::{KernelVirtualAddress, TaggedPointer};
use crate::error::{Error, Result};
use crate::macho::{ImageAccessor, SECT_KMOD_INFO, SECT_KMOD_START, SEG_PRELINK_INFO};
use crate::util::{fixed_cstr, packed_u64s, read_i32_le_at, read_u32_le_at, read_u64_le_at};

/// Length of the `name` and `version` fields of `kmod_info_t`.
pub const KMOD_MAX_NAME: usize = 64;

/// A decoded `kmod_info_t` record.
///
/// On-disk layout is packed little-endian with no padding:
///
/// | offset | size | field               |
/// |--------|------|---------------------|
/// | 0      | 8    | next                |
/// | 8      | 4    | info_version        |
/// | 12     | 4    | id                  |
/// | 16     | 64   | name                |
/// | 80     | 64   | version             |
/// | 144    | 4    | reference_count     |
/// | 148    | 8    | reference_list      |
/// | 156    | 8    | address             |
/// | 164    | 8    | size                |
/// | 172    | 8    | hdr_size            |
/// | 180    | 8    | start (rebase)      |
/// | 188    | 8    | stop (rebase)       |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmodInfo {
    /// Link to the next record (unused in prelinked images)
    pub next_addr: u64,
    /// Structure version
    pub info_version: i32,
    /// Kext ID
    pub id: u32,
    /// Bundle identifier, NUL-padded
    pub name: [u8; KMOD_MAX_NAME],
    /// Bundle version, NUL-padded
    pub version: [u8; KMOD_MAX_NAME],
    /// Number of linkage references to this kext
    pub reference_count: i32,
    /// Address of the list of kexts this one links against
    pub reference_list_addr: u64,
    /// Starting address
    pub address: u64,
    /// Total size
    pub size: u64,
    /// Unwired header size
    pub header_size: u64,
    /// Start routine; rebased once read
    pub start_addr: u64,
    /// Stop routine; rebased once read
    pub stop_addr: u64,
}

impl KmodInfo {
    /// Size of the on-disk record in bytes.
    pub const SIZE: usize = 196;

    const NAME_OFFSET: usize = 16;
    const VERSION_OFFSET: usize = Self::NAME_OFFSET + KMOD_MAX_NAME;
    const REF_COUNT_OFFSET: usize = Self::VERSION_OFFSET + KMOD_MAX_NAME;

    /// Decodes a record from the first [`SIZE`](Self::SIZE) bytes of `data`.
    ///
    /// Returns `None` when `data` is too short. Start and stop addresses are
    /// returned as stored, still encoded as rebases.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }

        let mut name = [0u8; KMOD_MAX_NAME];
        name.copy_from_slice(&data[Self::NAME_OFFSET..Self::VERSION_OFFSET]);
        let mut version = [0u8; KMOD_MAX_NAME];
        version.copy_from_slice(&data[Self::VERSION_OFFSET..Self::REF_COUNT_OFFSET]);

        let r = Self::REF_COUNT_OFFSET;
        Some(Self {
            next_addr: read_u64_le_at(data, 0),
            info_version: read_i32_le_at(data, 8),
            id: read_u32_le_at(data, 12),
            name,
            version,
            reference_count: read_i32_le_at(data, r),
            reference_list_addr: read_u64_le_at(data, r + 4),
            address: read_u64_le_at(data, r + 12),
            size: read_u64_le_at(data, r + 20),
            header_size: read_u64_le_at(data, r + 28),
            start_addr: read_u64_le_at(data, r + 36),
            stop_addr: read_u64_le_at(data, r + 44),
        })
    }

    /// Returns the bundle identifier.
    pub fn name(&self) -> String {
        fixed_cstr(&self.name)
    }

    /// Returns the version string.
    pub fn version(&self) -> String {
        fixed_cstr(&self.version)
    }

    /// Replaces the encoded start/stop rebases with absolute addresses.
    fn apply_fixups(&mut self, fixups: &FixupAdapter) -> Result<()> {
        self.start_addr = fixups.resolve(self.start_addr)?.get();
        self.stop_addr = fixups.resolve(self.stop_addr)?.get();
        Ok(())
    }
}

impl fmt::Display for KmodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id: {:#x}, name: {}, version: {}, ref_cnt: {}, ref_list: {:#x}, addr: {:#x}, size: {:#x}, header_size: {:#x}, start: {:#x}, stop: {:#x}, next: {:#x}, info_ver: {}",
            self.id,
            self.name(),
            self.version(),
            self.reference_count,
            self.reference_list_addr,
            self.address,
            self.size,
            self.header_size,
            self.start_addr,
            self.stop_addr,
            self.next_addr,
            self.info_version
        )
    }
}

/// Reads the `__kmod_start` array of kext load addresses.
///
/// Entries keep their top 16 bits cleared; see
/// [`TaggedPointer::with_tag_mask`].
pub fn read_kext_start_addrs<A: ImageAccessor + ?Sized>(image: &A) -> Result<Vec<TaggedPointer>> {
    let data = image.require_section(SEG_PRELINK_INFO, SECT_KMOD_START)?;
    let addrs: Vec<TaggedPointer> = packed_u64s(data).map(TaggedPointer).collect();
    debug!("Read {} kext start addresses", addrs.len());
    Ok(addrs)
}

/// Reads every `kmod_info_t` record referenced from `__kmod_info`.
///
/// Records come back in array order with start/stop rebased. Any failure
/// aborts the whole read.
pub fn read_kmod_infos<A: ImageAccessor + ?Sized>(image: &A) -> Result<Vec<KmodInfo>> {
    let data = image.require_section(SEG_PRELINK_INFO, SECT_KMOD_INFO)?;
    let fixups = FixupAdapter::new(image.base_address());

    let mut infos = Vec::with_capacity(data.len() / 8);
    let mut buf = [0u8; KmodInfo::SIZE];

    for ptr in packed_u64s(data).map(TaggedPointer) {
        let addr: KernelVirtualAddress = ptr.with_tag_mask();
        let offset = image.get_offset(addr.get())?;

        let n = image.read_at(&mut buf, offset)?;
        let mut info = KmodInfo::parse(&buf[..n]).ok_or(Error::RecordTruncated {
            offset,
            needed: KmodInfo::SIZE,
            available: n,
        })?;

        info.apply_fixups(&fixups)?;
        trace!("kmod_info @ {}: {}", addr, info);
        infos.push(info);
    }

    debug!("Read {} kmod_info records", infos.len());
    Ok(infos)
}
