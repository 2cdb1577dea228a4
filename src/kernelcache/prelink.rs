//! `__PRELINK_INFO,__info` bundle directory.
//!
//! The section holds an XML property list, NUL-padded to the section size,
//! whose `_PrelinkInfoDictionary` array describes every prelinked kext in
//! order. That order is the ordinal space `ModuleIndex` refers into.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::macho::{ImageAccessor, SECT_PRELINK_INFO, SEG_PRELINK_INFO};
use crate::util::trim_trailing_nuls;

/// Top-level prelink info dictionary.
#[derive(Debug, Default, Deserialize)]
struct PrelinkInfo {
    #[serde(rename = "_PrelinkInfoDictionary", default)]
    dictionary: Vec<KextBundle>,
}

/// One kext's entry in the prelink bundle directory.
///
/// Every key is optional in the plist; absent keys decode to defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KextBundle {
    // ==================== Identity ====================
    /// `CFBundleIdentifier`
    #[serde(rename = "CFBundleIdentifier")]
    pub id: String,
    /// `CFBundleName`
    #[serde(rename = "CFBundleName")]
    pub name: String,
    /// `CFBundleVersion`
    #[serde(rename = "CFBundleVersion")]
    pub version: String,
    /// `CFBundleShortVersionString`
    #[serde(rename = "CFBundleShortVersionString")]
    pub short_version_string: String,
    /// `OSBundleCompatibleVersion`
    #[serde(rename = "OSBundleCompatibleVersion")]
    pub compatible_version: String,
    /// `CFBundleExecutable`
    #[serde(rename = "CFBundleExecutable")]
    pub executable: String,
    /// `CFBundlePackageType`
    #[serde(rename = "CFBundlePackageType")]
    pub package_type: String,
    /// `CFBundleSignature`
    #[serde(rename = "CFBundleSignature")]
    pub signature: String,
    /// `CFBundleInfoDictionaryVersion`
    #[serde(rename = "CFBundleInfoDictionaryVersion")]
    pub info_dictionary_version: String,
    /// `CFBundleGetInfoString`
    #[serde(rename = "CFBundleGetInfoString")]
    pub get_info_string: String,
    /// `CFBundleDevelopmentRegion`
    #[serde(rename = "CFBundleDevelopmentRegion")]
    pub development_region: String,
    /// `NSHumanReadableCopyright`
    #[serde(rename = "NSHumanReadableCopyright")]
    pub copyright: String,

    // ==================== Build Provenance ====================
    /// `DTSDKName`
    #[serde(rename = "DTSDKName")]
    pub sdk: String,
    /// `DTSDKBuild`
    #[serde(rename = "DTSDKBuild")]
    pub sdk_build: String,
    /// `DTXcode`
    #[serde(rename = "DTXcode")]
    pub xcode: String,
    /// `DTXcodeBuild`
    #[serde(rename = "DTXcodeBuild")]
    pub xcode_build: String,
    /// `BuildMachineOSBuild`
    #[serde(rename = "BuildMachineOSBuild")]
    pub build_machine_os_build: String,
    /// `DTPlatformName`
    #[serde(rename = "DTPlatformName")]
    pub platform_name: String,
    /// `DTPlatformVersion`
    #[serde(rename = "DTPlatformVersion")]
    pub platform_version: String,
    /// `DTPlatformBuild`
    #[serde(rename = "DTPlatformBuild")]
    pub platform_build: String,
    /// `MinimumOSVersion`
    #[serde(rename = "MinimumOSVersion")]
    pub minimum_os_version: String,
    /// `CFBundleSupportedPlatforms`
    #[serde(rename = "CFBundleSupportedPlatforms")]
    pub supported_platforms: Vec<String>,

    // ==================== Capabilities ====================
    /// `IOKitPersonalities`
    #[serde(rename = "IOKitPersonalities")]
    pub iokit_personalities: BTreeMap<String, plist::Value>,
    /// `OSBundleLibraries`: required library identifier to version
    #[serde(rename = "OSBundleLibraries")]
    pub libraries: BTreeMap<String, String>,
    /// `UIDeviceFamily`
    #[serde(rename = "UIDeviceFamily")]
    pub device_family: Vec<i64>,
    /// `OSBundleRequired`
    #[serde(rename = "OSBundleRequired")]
    pub required: String,
    /// `UIRequiredDeviceCapabilities`
    #[serde(rename = "UIRequiredDeviceCapabilities")]
    pub required_device_capabilities: Vec<String>,
    /// `AppleSecurityExtension`
    #[serde(rename = "AppleSecurityExtension")]
    pub security_extension: bool,
    /// `OSKernelResource`: linked into the kernel itself
    #[serde(rename = "OSKernelResource")]
    pub kernel_resource: bool,
    /// `OSBundleAllowUserLoad`
    #[serde(rename = "OSBundleAllowUserLoad")]
    pub allow_user_load: bool,

    // ==================== Prelink Linkage ====================
    /// `ModuleIndex`: position in the `__kmod_start` array
    #[serde(rename = "ModuleIndex")]
    pub module_index: u64,
    /// `_PrelinkExecutableLoadAddr`
    #[serde(rename = "_PrelinkExecutableLoadAddr")]
    pub executable_load_addr: u64,
    /// `_PrelinkBundlePath`
    #[serde(rename = "_PrelinkBundlePath")]
    pub bundle_path: String,
    /// `_PrelinkExecutableRelativePath`
    #[serde(rename = "_PrelinkExecutableRelativePath")]
    pub relative_path: String,
}

/// Reads and decodes the prelink bundle directory of an image.
pub fn read_prelink_info<A: ImageAccessor + ?Sized>(image: &A) -> Result<Vec<KextBundle>> {
    let data = image.require_section(SEG_PRELINK_INFO, SECT_PRELINK_INFO)?;
    debug!("Prelink info section is {} bytes", data.len());
    decode_prelink_info(data)
}

/// Decodes prelink info bytes, ignoring trailing NUL padding.
pub fn decode_prelink_info(data: &[u8]) -> Result<Vec<KextBundle>> {
    let trimmed = trim_trailing_nuls(data);

    // Prelink XML starts at <dict> with no prolog, so format sniffing can't be
    // relied on for text. Binary plists have no IDREFs.
    let info: PrelinkInfo = match std::str::from_utf8(trimmed) {
        Ok(xml) => {
            let xml = resolve_idrefs(xml)?;
            plist::from_reader_xml(xml.as_bytes())
        }
        Err(_) => plist::from_bytes(trimmed),
    }
    .map_err(Error::plist)?;
    debug!("Decoded {} prelinked bundles", info.dictionary.len());
    Ok(info.dictionary)
}

// =============================================================================
// IDREF Resolution
// =============================================================================

/// Maximum nesting of IDREFs inside referenced elements.
const MAX_IDREF_DEPTH: usize = 32;

/// Inlines OSSerialize back-references.
///
/// The kernel's serializer writes a repeated object once with an `ID="n"`
/// attribute and afterwards as an empty `<tag IDREF="n"/>` element, which
/// generic plist readers reject. Each reference is replaced by a copy of the
/// element it names.
pub fn resolve_idrefs(xml: &str) -> Result<Cow<'_, str>> {
    if !xml.contains(" IDREF=\"") {
        return Ok(Cow::Borrowed(xml));
    }

    let defs = collect_definitions(xml)?;
    expand_references(xml, &defs, 0).map(Cow::Owned)
}

/// Returns the start of the tag enclosing `pos`, if `pos` is inside one.
fn enclosing_tag_start(xml: &str, pos: usize) -> Option<usize> {
    let lt = xml[..pos].rfind('<')?;
    match xml[..pos].rfind('>') {
        Some(gt) if gt > lt => None,
        _ => Some(lt),
    }
}

/// Returns the element name of the tag starting at `tag_start`.
fn tag_name(xml: &str, tag_start: usize) -> &str {
    let rest = &xml[tag_start + 1..];
    let end = rest
        .find(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/')
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Returns the position one past the `>` closing the tag at `tag_start`, and
/// whether the tag is self-closing.
fn tag_end(xml: &str, tag_start: usize) -> Option<(usize, bool)> {
    let gt = xml[tag_start..].find('>')? + tag_start;
    Some((gt + 1, xml[..gt].ends_with('/')))
}

/// Finds the end of the element `name` whose content starts at `pos`.
fn element_end(xml: &str, name: &str, mut pos: usize) -> Option<usize> {
    let close = format!("</{name}>");
    let mut depth = 1usize;

    while let Some(rel) = xml[pos..].find('<') {
        let lt = pos + rel;
        if xml[lt..].starts_with(&close) {
            depth -= 1;
            if depth == 0 {
                return Some(lt + close.len());
            }
            pos = lt + close.len();
            continue;
        }

        let (end, self_closing) = tag_end(xml, lt)?;
        if !self_closing && tag_name(xml, lt) == name {
            depth += 1;
        }
        pos = end;
    }

    None
}

/// Extracts the quoted value following `attr_pos` (which points at `ATTR="`).
fn quoted_value(xml: &str, value_start: usize) -> Option<&str> {
    let len = xml[value_start..].find('"')?;
    Some(&xml[value_start..value_start + len])
}

/// Maps each `ID` to its element text, with the `ID` attribute removed.
fn collect_definitions(xml: &str) -> Result<HashMap<String, String>> {
    const ATTR: &str = " ID=\"";
    let mut defs = HashMap::new();

    for (attr_pos, _) in xml.match_indices(ATTR) {
        let Some(tag_start) = enclosing_tag_start(xml, attr_pos) else {
            continue;
        };
        let value_start = attr_pos + ATTR.len();
        let id = quoted_value(xml, value_start)
            .ok_or_else(|| Error::plist(format!("unterminated ID attribute at {attr_pos}")))?;
        let (content_start, self_closing) = tag_end(xml, tag_start)
            .ok_or_else(|| Error::plist(format!("unterminated tag at {tag_start}")))?;

        let name = tag_name(xml, tag_start);
        let end = if self_closing {
            content_start
        } else {
            element_end(xml, name, content_start)
                .ok_or_else(|| Error::plist(format!("unclosed <{name}> with ID {id}")))?
        };

        let attr_end = value_start + id.len() + 1;
        let element = format!("{}{}", &xml[tag_start..attr_pos], &xml[attr_end..end]);
        defs.insert(id.to_string(), element);
    }

    Ok(defs)
}

/// Replaces every `<tag IDREF="n"/>` in `xml` with its definition.
fn expand_references(xml: &str, defs: &HashMap<String, String>, depth: usize) -> Result<String> {
    const ATTR: &str = " IDREF=\"";

    if depth > MAX_IDREF_DEPTH {
        return Err(Error::plist("IDREF nesting too deep"));
    }

    let mut out = String::with_capacity(xml.len());
    let mut copied = 0usize;

    for (attr_pos, _) in xml.match_indices(ATTR) {
        let Some(tag_start) = enclosing_tag_start(xml, attr_pos) else {
            continue;
        };
        if tag_start < copied {
            continue;
        }
        let id = quoted_value(xml, attr_pos + ATTR.len())
            .ok_or_else(|| Error::plist(format!("unterminated IDREF attribute at {attr_pos}")))?;
        let (end, _) = tag_end(xml, tag_start)
            .ok_or_else(|| Error::plist(format!("unterminated tag at {tag_start}")))?;
        let def = defs
            .get(id)
            .ok_or_else(|| Error::plist(format!("IDREF {id} has no matching ID")))?;

        out.push_str(&xml[copied..tag_start]);
        if def.contains(ATTR) {
            out.push_str(&expand_references(def, defs, depth + 1)?);
        } else {
            out.push_str(def);
        }
        copied = end;
    }

    out.push_str(&xml[copied..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRELINK_XML: &str = r#"<dict><key>_PrelinkInfoDictionary</key><array><dict><key>CFBundleIdentifier</key><string>com.apple.kpi.mach</string><key>CFBundleVersion</key><string ID="1">22.1.0</string><key>OSKernelResource</key><true/><key>ModuleIndex</key><integer size="64" ID="2">0x0</integer></dict><dict><key>CFBundleIdentifier</key><string>com.apple.driver.AppleARMPlatform</string><key>CFBundleName</key><string>AppleARMPlatform</string><key>CFBundleVersion</key><string>1.0.0d1</string><key>ModuleIndex</key><integer size="64">0x1</integer><key>OSBundleLibraries</key><dict><key>com.apple.kpi.mach</key><string IDREF="1"/></dict><key>UIDeviceFamily</key><array><integer size="64">1</integer><integer size="64">2</integer></array><key>IOKitPersonalities</key><dict><key>AppleARMPE</key><dict><key>IOClass</key><string>AppleARMPE</string></dict></dict><key>AppleSecurityExtension</key><true/></dict></array></dict>"#;

    #[test]
    fn test_decode_prelink_info() {
        let bundles = decode_prelink_info(PRELINK_XML.as_bytes()).unwrap();
        assert_eq!(bundles.len(), 2);

        assert_eq!(bundles[0].id, "com.apple.kpi.mach");
        assert_eq!(bundles[0].version, "22.1.0");
        assert!(bundles[0].kernel_resource);
        assert_eq!(bundles[0].module_index, 0);

        let platform = &bundles[1];
        assert_eq!(platform.id, "com.apple.driver.AppleARMPlatform");
        assert_eq!(platform.name, "AppleARMPlatform");
        assert!(!platform.kernel_resource);
        assert!(platform.security_extension);
        assert_eq!(platform.module_index, 1);
        assert_eq!(platform.device_family, vec![1, 2]);
        assert_eq!(
            platform.libraries.get("com.apple.kpi.mach").map(String::as_str),
            Some("22.1.0")
        );
        assert!(platform.iokit_personalities.contains_key("AppleARMPE"));
        assert!(platform.sdk.is_empty());
    }

    #[test]
    fn test_trailing_padding_is_ignored() {
        let plain = decode_prelink_info(PRELINK_XML.as_bytes()).unwrap();
        for pad in [1usize, 7, 4096] {
            let mut padded = PRELINK_XML.as_bytes().to_vec();
            padded.resize(padded.len() + pad, 0);
            assert_eq!(decode_prelink_info(&padded).unwrap(), plain);
        }
    }

    #[test]
    fn test_full_plist_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>_PrelinkInfoDictionary</key>
	<array>
		<dict>
			<key>CFBundleIdentifier</key>
			<string>com.example.test</string>
			<key>CFBundleVersion</key>
			<string>1.0</string>
			<key>ModuleIndex</key>
			<integer>0</integer>
		</dict>
	</array>
</dict>
</plist>
"#;
        let bundles = decode_prelink_info(xml.as_bytes()).unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].id, "com.example.test");
        assert_eq!(bundles[0].version, "1.0");
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = decode_prelink_info(b"<dict><key>_PrelinkInfoDictionary</key><array>\0\0").unwrap_err();
        assert!(matches!(err, Error::PlistDecode { .. }));
    }

    #[test]
    fn test_resolve_idrefs_without_references_borrows() {
        let xml = r#"<dict><key>a</key><string ID="1">x</string></dict>"#;
        assert!(matches!(resolve_idrefs(xml).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_resolve_idrefs_inlines_containers() {
        let xml = r#"<array><dict ID="3"><key>k</key><dict><key>n</key><integer ID="4">5</integer></dict></dict><dict IDREF="3"/><integer IDREF="4"/></array>"#;
        let resolved = resolve_idrefs(xml).unwrap();
        assert_eq!(
            resolved,
            r#"<array><dict ID="3"><key>k</key><dict><key>n</key><integer ID="4">5</integer></dict></dict><dict><key>k</key><dict><key>n</key><integer ID="4">5</integer></dict></dict><integer>5</integer></array>"#
        );
    }

    #[test]
    fn test_resolve_idrefs_unknown_reference() {
        let err = resolve_idrefs(r#"<array><string IDREF="9"/></array>"#).unwrap_err();
        assert!(matches!(err, Error::PlistDecode { .. }));
    }

    #[test]
    fn test_attribute_text_outside_tags_is_ignored() {
        let xml = r#"<array><string> IDREF="1"</string><string ID="1">a</string><string IDREF="1"/></array>"#;
        let resolved = resolve_idrefs(xml).unwrap();
        assert_eq!(
            resolved,
            r#"<array><string> IDREF="1"</string><string ID="1">a</string><string>a</string></array>"#
        );
    }
}
