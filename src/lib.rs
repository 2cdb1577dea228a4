//! kcdump - Recover kext and sandbox metadata from Apple prelinked kernelcaches.
//!
//! A kernelcache bundles the kernel with its prelinked extensions. This
//! library reads the prelink metadata back out of it:
//!
//! - the kext catalog: bundle identifier, version and load address per kext
//! - the `kmod_info_t` record of each kext, with start/stop routines rebased
//! - the sandbox kext's operation names
//!
//! # Example
//!
//! ```no_run
//! use kcdump::list_kexts;
//!
//! fn main() -> kcdump::Result<()> {
//!     for kext in list_kexts("/path/to/kernelcache.decompressed")? {
//!         println!("{kext}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The decoders are generic over [`ImageAccessor`], so an image can also be
//! opened once with [`MachOContext::open`] and passed to several of them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod kernelcache;
pub mod macho;
pub mod util;

// Re-export main types
pub use error::{Error, Result};
pub use kernelcache::{
    list_kexts, list_kexts_in, list_sandbox_operations, read_kmod_infos, sandbox_operations,
    KernelVirtualAddress, KextBundle, KextCatalogEntry, KmodInfo, SandboxScanOptions,
    TaggedPointer,
};
pub use macho::{ImageAccessor, MachOContext};
