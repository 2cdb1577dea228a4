//! Synthetic Mach-O images for unit tests.
//!
//! Sections are laid out back to back, 8-byte aligned, starting at their
//! segment's vmaddr. Segment file data follows the load commands in the order
//! segments were added, so the last section added ends the file.

use zerocopy::IntoBytes;

use super::constants::*;
use super::structs::*;
use crate::util::align_up;

struct SegmentSpec {
    name: String,
    vmaddr: u64,
    sections: Vec<(String, Vec<u8>)>,
}

struct FilesetSpec {
    entry_id: String,
    vmaddr: u64,
    fileoff: u64,
}

/// Builder for little-endian arm64e Mach-O images.
pub struct MachOBuilder {
    filetype: u32,
    uuid: Option<[u8; 16]>,
    fileset_entries: Vec<FilesetSpec>,
    segments: Vec<SegmentSpec>,
}

impl MachOBuilder {
    pub fn new() -> Self {
        Self {
            filetype: MH_EXECUTE,
            uuid: None,
            fileset_entries: Vec::new(),
            segments: Vec::new(),
        }
    }

    pub fn uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn fileset_entry(mut self, entry_id: &str, vmaddr: u64, fileoff: u64) -> Self {
        self.filetype = MH_FILESET;
        self.fileset_entries.push(FilesetSpec {
            entry_id: entry_id.to_string(),
            vmaddr,
            fileoff,
        });
        self
    }

    pub fn segment(mut self, name: &str, vmaddr: u64) -> Self {
        self.segments.push(SegmentSpec {
            name: name.to_string(),
            vmaddr,
            sections: Vec::new(),
        });
        self
    }

    /// Adds a section to the most recently added segment.
    pub fn section(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.segments
            .last_mut()
            .expect("section() called before segment()")
            .sections
            .push((name.to_string(), data.into()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut cmds: Vec<u8> = Vec::new();
        let mut ncmds = 0u32;

        if let Some(uuid) = self.uuid {
            let cmd = UuidCommand {
                uuid,
                ..Default::default()
            };
            cmds.extend_from_slice(cmd.as_bytes());
            ncmds += 1;
        }

        for entry in &self.fileset_entries {
            let cmdsize = align_up((FilesetEntryCommand::SIZE + entry.entry_id.len() + 1) as u64, 8);
            let cmd = FilesetEntryCommand {
                cmd: LC_FILESET_ENTRY,
                cmdsize: cmdsize as u32,
                vmaddr: entry.vmaddr,
                fileoff: entry.fileoff,
                entry_id_offset: FilesetEntryCommand::SIZE as u32,
                reserved: 0,
            };
            let start = cmds.len();
            cmds.extend_from_slice(cmd.as_bytes());
            cmds.extend_from_slice(entry.entry_id.as_bytes());
            cmds.resize(start + cmdsize as usize, 0);
            ncmds += 1;
        }

        let segment_cmds_size: usize = self
            .segments
            .iter()
            .map(|s| SegmentCommand64::SIZE + Section64::SIZE * s.sections.len())
            .sum();
        let sizeofcmds = cmds.len() + segment_cmds_size;
        let mut cursor = align_up((MachHeader64::SIZE + sizeofcmds) as u64, 0x100) as usize;

        let mut payload: Vec<(usize, &[u8])> = Vec::new();
        for spec in &self.segments {
            let fileoff = cursor;
            let mut rel = 0usize;
            let mut sects = Vec::with_capacity(spec.sections.len());

            for (name, data) in &spec.sections {
                let mut sect = Section64::default();
                sect.set_name(name);
                sect.set_segment_name(&spec.name);
                sect.addr = spec.vmaddr + rel as u64;
                sect.size = data.len() as u64;
                sect.offset = (fileoff + rel) as u32;
                sect.align = 3;
                sects.push(sect);
                payload.push((fileoff + rel, data.as_slice()));
                rel = align_up((rel + data.len()) as u64, 8) as usize;
            }

            let mut seg = SegmentCommand64::default();
            seg.set_name(&spec.name);
            seg.cmdsize = (SegmentCommand64::SIZE + Section64::SIZE * sects.len()) as u32;
            seg.vmaddr = spec.vmaddr;
            seg.vmsize = rel as u64;
            seg.fileoff = fileoff as u64;
            seg.filesize = rel as u64;
            seg.maxprot = 3;
            seg.initprot = 3;
            seg.nsects = sects.len() as u32;

            cmds.extend_from_slice(seg.as_bytes());
            for sect in &sects {
                cmds.extend_from_slice(sect.as_bytes());
            }
            ncmds += 1;
            cursor = fileoff + rel;
        }

        let header = MachHeader64 {
            magic: MH_MAGIC_64,
            cputype: CPU_TYPE_ARM64,
            cpusubtype: CPU_SUBTYPE_ARM64E,
            filetype: self.filetype,
            ncmds,
            sizeofcmds: sizeofcmds as u32,
            flags: 0x0020_0001,
            reserved: 0,
        };

        let header_end = MachHeader64::SIZE + sizeofcmds;
        let mut out = vec![0u8; cursor.max(header_end)];
        out[..MachHeader64::SIZE].copy_from_slice(header.as_bytes());
        out[MachHeader64::SIZE..header_end].copy_from_slice(&cmds);
        for (offset, data) in payload {
            out[offset..offset + data.len()].copy_from_slice(data);
        }
        out
    }
}

/// Packs values as a little-endian u64 array.
pub fn pack_u64s(values: &[u64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
