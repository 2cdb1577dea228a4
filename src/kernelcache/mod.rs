//! Kernelcache kext extraction.
//!
//! A prelinked kernelcache describes each kext three times over:
//! - `__PRELINK_INFO,__info`: a property list of bundle descriptors
//! - `__PRELINK_INFO,__kmod_start`: packed load addresses, indexed by `ModuleIndex`
//! - `__PRELINK_INFO,__kmod_info`: packed pointers to `kmod_info_t` records
//!
//! [`list_kexts`] joins the first two into a catalog; [`read_kmod_infos`]
//! decodes the third. [`sandbox_operations`] is an independent scan of the
//! sandbox kext's operation table.

mod catalog;
mod fixup;
pub(crate) mod kmod;
mod prelink;
mod sandbox;
mod tagged;

pub use catalog::*;
pub use fixup::*;
pub use kmod::{read_kext_start_addrs, read_kmod_infos, KmodInfo, KMOD_MAX_NAME};
pub use prelink::*;
pub use sandbox::*;
pub use tagged::*;
