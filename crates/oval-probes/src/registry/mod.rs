//! Static registry of probe executables.
//!
//! Every object type that can be evaluated externally has exactly one
//! [`ProbeDescriptor`] in [`PROBES`]. The table is authored in ascending
//! [`ObjectType`] order so lookups can binary search it; nothing sorts it at
//! runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric object subtype identifier.
///
/// # Example
///
/// ```
/// use oval_probes::ObjectType;
///
/// assert_eq!(ObjectType::RPM_INFO.get(), 9003);
/// assert!(ObjectType::FAMILY < ObjectType::FILE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectType(u32);

impl ObjectType {
    /// Independent `family_object`.
    pub const FAMILY: Self = Self(7001);
    /// Independent `textfilecontent54_object`.
    pub const TEXT_FILE_CONTENT_54: Self = Self(7006);
    /// Independent `xmlfilecontent_object`.
    pub const XML_FILE_CONTENT: Self = Self(7010);
    /// Linux `dpkginfo_object`.
    pub const DPKG_INFO: Self = Self(9001);
    /// Linux `rpminfo_object`.
    pub const RPM_INFO: Self = Self(9003);
    /// Linux `slackwarepkginfo_object`.
    pub const SLACKWARE_PKG_INFO: Self = Self(9004);
    /// Unix `file_object`.
    pub const FILE: Self = Self(13001);
    /// Unix `runlevel_object`.
    pub const RUNLEVEL: Self = Self(13006);

    /// Wraps a raw subtype number.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw subtype number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry entry linking an object type to the probe that inspects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeDescriptor {
    object_type: ObjectType,
    display_name: &'static str,
    worker_name: &'static str,
}

impl ProbeDescriptor {
    const fn new(
        object_type: ObjectType,
        display_name: &'static str,
        worker_name: &'static str,
    ) -> Self {
        Self {
            object_type,
            display_name,
            worker_name,
        }
    }

    /// Object type served by the probe.
    #[must_use]
    pub const fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Short name used as the request's element name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        self.display_name
    }

    /// File name of the probe executable inside the probe directory.
    #[must_use]
    pub const fn worker_name(&self) -> &'static str {
        self.worker_name
    }
}

/// All known probes. Keep sorted by object type.
pub static PROBES: &[ProbeDescriptor] = &[
    ProbeDescriptor::new(ObjectType::FAMILY, "family", "probe_family"),
    ProbeDescriptor::new(
        ObjectType::TEXT_FILE_CONTENT_54,
        "textfilecontent54",
        "probe_textfilecontent54",
    ),
    ProbeDescriptor::new(
        ObjectType::XML_FILE_CONTENT,
        "xmlfilecontent",
        "probe_xmlfilecontent",
    ),
    ProbeDescriptor::new(ObjectType::DPKG_INFO, "dpkginfo", "probe_dpkginfo"),
    ProbeDescriptor::new(ObjectType::RPM_INFO, "rpminfo", "probe_rpminfo"),
    ProbeDescriptor::new(
        ObjectType::SLACKWARE_PKG_INFO,
        "slackwarepkginfo",
        "probe_slackwarepkginfo",
    ),
    ProbeDescriptor::new(ObjectType::FILE, "file", "probe_file"),
    ProbeDescriptor::new(ObjectType::RUNLEVEL, "runlevel", "probe_runlevel"),
];

/// Returns the probe table.
#[must_use]
pub fn probes() -> &'static [ProbeDescriptor] {
    PROBES
}

/// Finds the probe serving `object_type`.
///
/// # Example
///
/// ```
/// use oval_probes::{ObjectType, registry};
///
/// let probe = registry::lookup_by_type(ObjectType::FILE).unwrap();
/// assert_eq!(probe.worker_name(), "probe_file");
/// assert!(registry::lookup_by_type(ObjectType::new(1)).is_none());
/// ```
#[must_use]
pub fn lookup_by_type(object_type: ObjectType) -> Option<&'static ProbeDescriptor> {
    debug_assert!(is_sorted(PROBES), "probe table must be sorted by object type");
    PROBES
        .binary_search_by_key(&object_type, ProbeDescriptor::object_type)
        .ok()
        .and_then(|index| PROBES.get(index))
}

/// Finds the object type whose probe has the given display name.
///
/// Matching is exact and case-sensitive.
#[must_use]
pub fn lookup_by_name(name: &str) -> Option<ObjectType> {
    PROBES
        .iter()
        .find(|probe| probe.display_name == name)
        .map(ProbeDescriptor::object_type)
}

fn is_sorted(table: &[ProbeDescriptor]) -> bool {
    table
        .windows(2)
        .all(|pair| matches!(pair, [a, b] if a.object_type < b.object_type))
}
