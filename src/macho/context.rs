//! Read-only Mach-O context for kernelcache images.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;
use zerocopy::FromBytes;

use super::constants::*;
use super::structs::*;
use crate::error::{Error, Result};
use crate::util::memchr_null;

// =============================================================================
// Segment Info
// =============================================================================

/// Parsed segment information.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    /// The segment command
    pub command: SegmentCommand64,
    /// Offset of the segment command in the file
    pub command_offset: usize,
    /// Sections in this segment
    pub sections: Vec<SectionInfo>,
}

impl SegmentInfo {
    /// Returns the segment name.
    pub fn name(&self) -> &str {
        self.command.name()
    }

    /// Returns a section by name.
    pub fn section(&self, name: &str) -> Option<&SectionInfo> {
        self.sections.iter().find(|s| s.section.name() == name)
    }
}

/// Parsed section information.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    /// The section structure
    pub section: Section64,
}

impl SectionInfo {
    /// Returns the section name.
    pub fn name(&self) -> &str {
        self.section.name()
    }

    /// Returns the full name (segment,section).
    pub fn full_name(&self) -> String {
        format!("{},{}", self.section.segment_name(), self.section.name())
    }
}

// =============================================================================
// Load Command Info
// =============================================================================

/// Parsed load command information.
///
/// Only the commands needed to navigate a kernelcache are decoded; everything
/// else is kept as `Unknown`.
#[derive(Debug, Clone)]
#[allow(missing_docs)] // Variants are self-documenting via names
pub enum LoadCommandInfo {
    Segment(SegmentInfo),
    Uuid {
        command: UuidCommand,
        offset: usize,
    },
    FilesetEntry {
        command: FilesetEntryCommand,
        entry_id: String,
        offset: usize,
    },
    Unknown {
        cmd: u32,
        cmdsize: u32,
        offset: usize,
    },
}

// =============================================================================
// Mach-O Context
// =============================================================================

/// Read-only view of a 64-bit little-endian Mach-O image.
///
/// The backing storage is generic: [`MachOContext::open`] maps a file with
/// `memmap2`, tests hand in a `Vec<u8>`. The mapping is released when the
/// context is dropped.
#[derive(Debug)]
pub struct MachOContext<D = Vec<u8>> {
    /// The Mach-O header
    pub header: MachHeader64,
    /// Parsed load commands
    pub load_commands: Vec<LoadCommandInfo>,
    /// Segment lookup by name
    segment_indices: HashMap<String, usize>,
    /// Raw image bytes
    data: D,
}

impl MachOContext<Mmap> {
    /// Opens and memory-maps a Mach-O file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path).map_err(|e| Error::FileOpen {
            path: path.to_path_buf(),
            source: e,
        })?;

        // SAFETY: the mapping is read-only and owned by the context; callers
        // must not truncate the file while it is open.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
            path: path.to_path_buf(),
            source: e,
        })?;

        debug!("Mapped {} ({} bytes)", path.display(), mmap.len());

        Self::new(mmap)
    }
}

impl<D: AsRef<[u8]>> MachOContext<D> {
    /// Creates a new Mach-O context over raw image bytes.
    pub fn new(data: D) -> Result<Self> {
        let bytes = data.as_ref();

        if bytes.len() < MachHeader64::SIZE {
            return Err(Error::BufferTooSmall {
                needed: MachHeader64::SIZE,
                available: bytes.len(),
            });
        }

        let header = MachHeader64::read_from_prefix(bytes)
            .map_err(|_| Error::InvalidMachoMagic(0))?
            .0;

        if !header.is_valid() {
            return Err(Error::InvalidMachoMagic(header.magic));
        }

        let load_commands = parse_load_commands(bytes, &header)?;

        let segment_indices = load_commands
            .iter()
            .enumerate()
            .filter_map(|(idx, lc)| match lc {
                LoadCommandInfo::Segment(seg) => Some((seg.name().to_string(), idx)),
                _ => None,
            })
            .collect();

        Ok(Self {
            header,
            load_commands,
            segment_indices,
            data,
        })
    }

    /// Returns the raw image bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Returns a reference to a segment by name.
    pub fn segment(&self, name: &str) -> Option<&SegmentInfo> {
        self.segment_indices.get(name).and_then(|&idx| {
            if let LoadCommandInfo::Segment(ref seg) = self.load_commands[idx] {
                Some(seg)
            } else {
                None
            }
        })
    }

    /// Returns an iterator over all segments.
    pub fn segments(&self) -> impl Iterator<Item = &SegmentInfo> {
        self.load_commands.iter().filter_map(|lc| {
            if let LoadCommandInfo::Segment(seg) = lc {
                Some(seg)
            } else {
                None
            }
        })
    }

    /// Returns a section by segment and section name.
    pub fn section(&self, segment: &str, section: &str) -> Option<&SectionInfo> {
        self.segment(segment)?.section(section)
    }

    /// Returns the file-backed bytes of a section.
    pub fn section_data(&self, section: &SectionInfo) -> Result<&[u8]> {
        self.read_at(section.section.offset as usize, section.section.size as usize)
    }

    /// Returns the image UUID, if the image carries one.
    pub fn uuid(&self) -> Option<[u8; 16]> {
        self.load_commands.iter().find_map(|lc| {
            if let LoadCommandInfo::Uuid { command, .. } = lc {
                Some(command.uuid)
            } else {
                None
            }
        })
    }

    /// Returns an iterator over fileset entries as `(entry_id, vmaddr, fileoff)`.
    pub fn fileset_entries(&self) -> impl Iterator<Item = (&str, u64, u64)> {
        self.load_commands.iter().filter_map(|lc| {
            if let LoadCommandInfo::FilesetEntry {
                command, entry_id, ..
            } = lc
            {
                Some((entry_id.as_str(), command.vmaddr, command.fileoff))
            } else {
                None
            }
        })
    }

    /// Returns the image base address: the `__TEXT` vmaddr, or 0 without one.
    pub fn base_address(&self) -> u64 {
        self.segment(SEG_TEXT)
            .map(|seg| seg.command.vmaddr)
            .unwrap_or(0)
    }

    /// Reads data at the specified file offset.
    pub fn read_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let data = self.as_bytes();
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::buffer_too_small(usize::MAX, data.len()))?;
        if end > data.len() {
            return Err(Error::BufferTooSmall {
                needed: end,
                available: data.len(),
            });
        }
        Ok(&data[offset..end])
    }

    /// Converts a virtual address to a file offset within this Mach-O.
    pub fn addr_to_offset(&self, addr: u64) -> Option<u64> {
        self.segments()
            .find(|seg| seg.command.contains_addr(addr))
            .map(|seg| seg.command.fileoff + (addr - seg.command.vmaddr))
    }

    /// Reads a NUL-terminated string at a virtual address.
    pub fn cstring_at(&self, addr: u64) -> Result<String> {
        let offset = self
            .addr_to_offset(addr)
            .ok_or_else(|| Error::address_not_mapped(addr))?;
        let data = self.as_bytes();
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start < data.len())
            .ok_or_else(|| Error::address_not_mapped(addr))?;
        let tail = &data[start..];
        let len = memchr_null(tail);
        if len == tail.len() {
            return Err(Error::UnterminatedString { addr });
        }
        Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
    }
}

// =============================================================================
// Load Command Parsing
// =============================================================================

/// Parses all load commands following the header.
fn parse_load_commands(data: &[u8], header: &MachHeader64) -> Result<Vec<LoadCommandInfo>> {
    let mut load_commands = Vec::with_capacity(header.ncmds as usize);
    let mut offset = MachHeader64::SIZE;
    let end_offset = MachHeader64::SIZE + header.sizeofcmds as usize;

    for _ in 0..header.ncmds {
        if offset + LoadCommand::SIZE > end_offset || offset + LoadCommand::SIZE > data.len() {
            return Err(Error::LoadCommandOverflow { offset });
        }

        let lc = LoadCommand::read_from_prefix(&data[offset..])
            .map_err(|_| Error::parse(offset, "failed to parse load command"))?
            .0;

        let cmdsize = lc.cmdsize as usize;
        if cmdsize < LoadCommand::SIZE || offset + cmdsize > data.len() {
            return Err(Error::LoadCommandOverflow { offset });
        }

        let cmd_data = &data[offset..offset + cmdsize];
        load_commands.push(parse_load_command(data, lc, cmd_data, offset)?);
        offset += cmdsize;
    }

    Ok(load_commands)
}

/// Parses a single load command.
fn parse_load_command(
    data: &[u8],
    lc: LoadCommand,
    cmd_data: &[u8],
    offset: usize,
) -> Result<LoadCommandInfo> {
    match lc.cmd {
        LC_SEGMENT_64 => {
            let seg = SegmentCommand64::read_from_prefix(cmd_data)
                .map_err(|_| Error::parse(offset, "failed to parse segment command"))?
                .0;

            let mut sections = Vec::with_capacity(seg.nsects as usize);
            let mut sect_offset = offset + SegmentCommand64::SIZE;

            for _ in 0..seg.nsects {
                let sect = data
                    .get(sect_offset..)
                    .and_then(|rest| Section64::read_from_prefix(rest).ok())
                    .ok_or_else(|| Error::parse(sect_offset, "failed to parse section"))?
                    .0;

                sections.push(SectionInfo { section: sect });

                sect_offset += Section64::SIZE;
            }

            Ok(LoadCommandInfo::Segment(SegmentInfo {
                command: seg,
                command_offset: offset,
                sections,
            }))
        }

        LC_UUID => {
            let uuid = UuidCommand::read_from_prefix(cmd_data)
                .map_err(|_| Error::parse(offset, "failed to parse uuid command"))?
                .0;

            Ok(LoadCommandInfo::Uuid {
                command: uuid,
                offset,
            })
        }

        LC_FILESET_ENTRY => {
            let entry = FilesetEntryCommand::read_from_prefix(cmd_data)
                .map_err(|_| Error::parse(offset, "failed to parse fileset entry command"))?
                .0;

            let id_offset = entry.entry_id_offset as usize;
            let entry_id = match cmd_data.get(id_offset..) {
                Some(name_bytes) => {
                    let end = memchr_null(name_bytes);
                    String::from_utf8_lossy(&name_bytes[..end]).into_owned()
                }
                None => String::new(),
            };

            Ok(LoadCommandInfo::FilesetEntry {
                command: entry,
                entry_id,
                offset,
            })
        }

        cmd => Ok(LoadCommandInfo::Unknown {
            cmd,
            cmdsize: lc.cmdsize,
            offset,
        }),
    }
}
