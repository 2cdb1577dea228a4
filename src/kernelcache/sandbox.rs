//! Sandbox kext policy tables.
//!
//! The sandbox kext keeps its operation names as a table of C-string pointers
//! in `__DATA_CONST,__const`. Nothing marks where the table starts, so it is
//! found by scanning for the first operation, `"default"`, and followed while
//! entries carry the chaining tag. This is a structural heuristic that matches
//! observed compiler output, not a documented format.

use std::path::Path;

use tracing::{debug, trace};

use super::tagged::TaggedPointer;
use crate::error::Result;
use crate::macho::{ImageAccessor, MachOContext, SECT_CONST, SEG_DATA_CONST, SEG_TEXT};
use crate::util::{find_all, packed_u64s};

/// Marker preceding candidate sandbox profiles in `__TEXT,__const`.
pub const PROFILE_MARKER: [u8; 2] = [0x00, 0x80];

/// Tuning for [`sandbox_operations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxScanOptions {
    /// First operation name; collection starts here.
    pub anchor: String,
    /// Pointer tag meaning another operation pointer follows.
    pub chain_tag: u16,
}

impl Default for SandboxScanOptions {
    fn default() -> Self {
        Self {
            anchor: "default".to_string(),
            chain_tag: 0x17,
        }
    }
}

/// Recovers the ordered sandbox operation names of an image.
///
/// Returns an empty list when the image has no `__DATA_CONST,__const` or the
/// anchor is never found.
pub fn sandbox_operations<A: ImageAccessor + ?Sized>(
    image: &A,
    opts: &SandboxScanOptions,
) -> Result<Vec<String>> {
    let Some(data) = image.section_bytes(SEG_DATA_CONST, SECT_CONST)? else {
        debug!("No {},{} section; no sandbox operations", SEG_DATA_CONST, SECT_CONST);
        return Ok(Vec::new());
    };

    let mut ops = Vec::new();
    let mut found = false;

    for ptr in packed_u64s(data).map(TaggedPointer) {
        if ptr.is_null() {
            continue;
        }

        let name = match image.get_cstring(ptr.with_tag_mask().get()) {
            Ok(name) => name,
            Err(e) if found => {
                trace!("Operation table ends at {:#x}: {}", ptr, e);
                break;
            }
            Err(_) => continue,
        };

        if !found && name == opts.anchor {
            debug!("Found sandbox operation anchor {:?} at {:#x}", name, ptr);
            found = true;
        }

        if found {
            let chained = ptr.tag() == opts.chain_tag;
            ops.push(name);
            if !chained {
                break;
            }
        }
    }

    debug!("Recovered {} sandbox operations", ops.len());
    Ok(ops)
}

/// Returns the offsets within `__TEXT,__const` of every [`PROFILE_MARKER`].
///
/// Only boundary candidates are located; profile bytecode is not decoded.
pub fn find_profile_boundaries<A: ImageAccessor + ?Sized>(image: &A) -> Result<Vec<usize>> {
    let Some(data) = image.section_bytes(SEG_TEXT, SECT_CONST)? else {
        return Ok(Vec::new());
    };

    let offsets = find_all(&PROFILE_MARKER, data);
    debug!("Found {} candidate sandbox profile boundaries", offsets.len());
    Ok(offsets)
}

/// Opens an image at `path` and lists its sandbox operations.
pub fn list_sandbox_operations<P: AsRef<Path>>(
    path: P,
    opts: &SandboxScanOptions,
) -> Result<Vec<String>> {
    let image = MachOContext::open(path)?;
    sandbox_operations(&image, opts)
}
