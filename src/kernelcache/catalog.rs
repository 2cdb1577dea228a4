//! Kext catalog: prelink bundles joined with their load addresses.

use std::fmt;
use std::path::Path;

use tracing::{debug, info, trace};

use super::kmod::read_kext_start_addrs;
use super::prelink::{read_prelink_info, KextBundle};
use super::tagged::{KernelVirtualAddress, TaggedPointer};
use crate::error::{Error, Result};
use crate::macho::{ImageAccessor, MachOContext};

/// One kext in a kernelcache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KextCatalogEntry {
    /// Load address, or [`KernelVirtualAddress::NONE`] for kernel resources
    pub load_address: KernelVirtualAddress,
    /// `CFBundleIdentifier`
    pub bundle_id: String,
    /// `CFBundleVersion`
    pub version: String,
}

impl fmt::Display for KextCatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}  {} ({})", self.load_address, self.bundle_id, self.version)
    }
}

/// Joins bundles with the `__kmod_start` array by `ModuleIndex`.
///
/// Kernel resources are linked into the kernel and get
/// [`KernelVirtualAddress::NONE`] without their index being checked. Any
/// other bundle whose index falls outside the array makes the whole catalog
/// fail with [`Error::IndexOutOfRange`].
pub fn build_catalog(
    bundles: &[KextBundle],
    start_addrs: &[TaggedPointer],
) -> Result<Vec<KextCatalogEntry>> {
    bundles
        .iter()
        .map(|bundle| {
            let load_address = if bundle.kernel_resource {
                KernelVirtualAddress::NONE
            } else {
                let ptr = usize::try_from(bundle.module_index)
                    .ok()
                    .and_then(|idx| start_addrs.get(idx))
                    .ok_or_else(|| Error::IndexOutOfRange {
                        bundle_id: bundle.id.clone(),
                        index: bundle.module_index,
                        count: start_addrs.len(),
                    })?;
                ptr.with_tag_mask()
            };

            trace!("{} -> {}", bundle.id, load_address);
            Ok(KextCatalogEntry {
                load_address,
                bundle_id: bundle.id.clone(),
                version: bundle.version.clone(),
            })
        })
        .collect()
}

/// Builds the kext catalog of an already opened image.
pub fn list_kexts_in<A: ImageAccessor + ?Sized>(image: &A) -> Result<Vec<KextCatalogEntry>> {
    let start_addrs = read_kext_start_addrs(image)?;
    let bundles = read_prelink_info(image)?;
    debug!(
        "Joining {} bundles with {} start addresses",
        bundles.len(),
        start_addrs.len()
    );
    build_catalog(&bundles, &start_addrs)
}

/// Opens the kernelcache at `path` and lists its kexts in prelink order.
///
/// The mapping is dropped before returning, whether or not listing succeeds.
pub fn list_kexts<P: AsRef<Path>>(path: P) -> Result<Vec<KextCatalogEntry>> {
    let image = MachOContext::open(path.as_ref())?;
    let kexts = list_kexts_in(&image)?;
    info!("Found {} kexts in {}", kexts.len(), path.as_ref().display());
    Ok(kexts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernelcache::kmod::tests::TEXT_BASE;
    use crate::macho::testutil::{pack_u64s, MachOBuilder};
    use crate::macho::{SECT_KMOD_START, SECT_PRELINK_INFO, SEG_PRELINK_INFO};

    fn bundle(id: &str, version: &str, module_index: u64, kernel_resource: bool) -> KextBundle {
        KextBundle {
            id: id.to_string(),
            version: version.to_string(),
            module_index,
            kernel_resource,
            ..Default::default()
        }
    }

    const PRELINK_XML: &str = r#"<dict><key>_PrelinkInfoDictionary</key><array><dict><key>CFBundleIdentifier</key><string>com.apple.kernel</string><key>CFBundleVersion</key><string ID="1">22.1.0</string><key>OSKernelResource</key><true/><key>ModuleIndex</key><integer size="64">0x9</integer></dict><dict><key>CFBundleIdentifier</key><string>com.apple.driver.B</string><key>CFBundleVersion</key><string>2.0</string><key>ModuleIndex</key><integer size="64">0x1</integer></dict><dict><key>CFBundleIdentifier</key><string>com.apple.driver.A</string><key>CFBundleVersion</key><string IDREF="1"/><key>ModuleIndex</key><integer size="64">0x0</integer></dict></array></dict>"#;

    fn kernelcache(start_addrs: &[u64]) -> Vec<u8> {
        let mut info = PRELINK_XML.as_bytes().to_vec();
        info.resize(0x400, 0);
        MachOBuilder::new()
            .segment("__TEXT", TEXT_BASE)
            .segment(SEG_PRELINK_INFO, 0xFFFF_FFF0_0800_0000)
            .section(SECT_KMOD_START, pack_u64s(start_addrs))
            .section(SECT_PRELINK_INFO, info)
            .build()
    }

    #[test]
    fn test_single_kext_gets_tagged_load_address() {
        let bundles = [bundle("com.example.test", "1.0", 0, false)];
        let catalog = build_catalog(&bundles, &[TaggedPointer(0x0000_0000_1234_0000)]).unwrap();
        assert_eq!(
            catalog,
            vec![KextCatalogEntry {
                load_address: KernelVirtualAddress(0xFFFF_0000_1234_0000),
                bundle_id: "com.example.test".to_string(),
                version: "1.0".to_string(),
            }]
        );
    }

    #[test]
    fn test_kernel_resource_skips_bounds_check() {
        let bundles = [bundle("com.apple.kpi.bsd", "22.1.0", 5, true)];
        let catalog = build_catalog(&bundles, &[TaggedPointer(0x1234_0000)]).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog[0].load_address.is_none());
    }

    #[test]
    fn test_missing_kmod_start_yields_no_catalog() {
        let mut info = PRELINK_XML.as_bytes().to_vec();
        info.push(0);
        let data = MachOBuilder::new()
            .segment("__TEXT", TEXT_BASE)
            .segment(SEG_PRELINK_INFO, 0xFFFF_FFF0_0800_0000)
            .section(SECT_PRELINK_INFO, info)
            .build();
        let img = MachOContext::new(data).unwrap();

        let err = list_kexts_in(&img).unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, Error::SectionMissing { ref section, .. } if section == SECT_KMOD_START));
    }

    #[test]
    fn test_index_out_of_range_aborts() {
        let bundles = [
            bundle("com.apple.driver.A", "1.0", 0, false),
            bundle("com.apple.driver.B", "1.0", 1, false),
        ];
        let err = build_catalog(&bundles, &[TaggedPointer(0x1234_0000)]).unwrap_err();
        match err {
            Error::IndexOutOfRange {
                bundle_id,
                index,
                count,
            } => {
                assert_eq!(bundle_id, "com.apple.driver.B");
                assert_eq!(index, 1);
                assert_eq!(count, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_catalog_keeps_plist_order() {
        let img = MachOContext::new(kernelcache(&[0xFFF0_0710_0000, 0xFFF0_0720_0000])).unwrap();
        let catalog = list_kexts_in(&img).unwrap();

        let ids: Vec<&str> = catalog.iter().map(|e| e.bundle_id.as_str()).collect();
        assert_eq!(ids, ["com.apple.kernel", "com.apple.driver.B", "com.apple.driver.A"]);
        assert_eq!(catalog[0].load_address, KernelVirtualAddress::NONE);
        assert_eq!(catalog[1].load_address, KernelVirtualAddress(0xFFFF_FFF0_0720_0000));
        assert_eq!(catalog[2].load_address, KernelVirtualAddress(0xFFFF_FFF0_0710_0000));
        assert_eq!(catalog[2].version, "22.1.0");
    }

    #[test]
    fn test_catalog_is_deterministic() {
        let img = MachOContext::new(kernelcache(&[0xFFF0_0710_0000, 0xFFF0_0720_0000])).unwrap();
        let first = list_kexts_in(&img).unwrap();
        let second = list_kexts_in(&img).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_entry_display() {
        let kernel = KextCatalogEntry {
            load_address: KernelVirtualAddress::NONE,
            bundle_id: "com.apple.kpi.bsd".to_string(),
            version: "22.1.0".to_string(),
        };
        assert_eq!(kernel.to_string(), "0x0000000000000000  com.apple.kpi.bsd (22.1.0)");

        let entry = KextCatalogEntry {
            load_address: KernelVirtualAddress(0xFFFF_FFF0_0710_0000),
            bundle_id: "com.apple.driver.A".to_string(),
            version: "1.0".to_string(),
        };
        assert_eq!(entry.to_string(), "0xfffffff007100000  com.apple.driver.A (1.0)");
    }
}
