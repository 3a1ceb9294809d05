use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Content-derived identifier of an object file (e.g., GNU build ID).
///
/// It is stored as a lowercase hexadecimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildId(String);

impl BuildId {
    /// Creates a build ID from its hexadecimal representation.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    /// Creates a build ID from its raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hex = bytes.iter().fold(String::new(), |mut hex, b| {
            use fmt::Write;
            let _ = write!(hex, "{b:02x}");
            hex
        });

        Self(hex)
    }

    /// Returns the hexadecimal representation of the build ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object file backing one or many mappings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectFile {
    /// Build ID of the object file, if it has one.
    build_id: Option<BuildId>,

    /// Path of the object file, as seen by the process.
    path: PathBuf,
}

impl ObjectFile {
    /// Creates a new object file handle.
    pub fn new(path: impl Into<PathBuf>, build_id: Option<BuildId>) -> Self {
        Self {
            build_id,
            path: path.into(),
        }
    }

    /// Returns the build ID of the object file.
    pub fn build_id(&self) -> Option<&BuildId> {
        self.build_id.as_ref()
    }

    /// Returns the path of the object file, as seen by the process.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Virtual memory region of a process, backed by a file.
#[derive(Debug, Clone)]
pub struct Mapping {
    /// Virtual address range of the mapping.
    addr_range: Range<u64>,

    /// Offset of the mapping within the backing file.
    offset: u64,

    /// Path name of the mapping (as reported by the OS).
    pathname: String,

    /// Root directory from which the backing file is reachable.
    root: PathBuf,

    /// Address subtracted from virtual addresses during normalization.
    base: u64,

    /// Backing object file, if it could be resolved.
    object_file: Option<Arc<ObjectFile>>,
}

impl Mapping {
    /// Creates a new (closed) mapping.
    ///
    /// The normalization base defaults to `addr_range.start - offset`, which
    /// can be overridden with [with_base](Self::with_base).
    pub fn new(
        addr_range: Range<u64>,
        offset: u64,
        pathname: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base: addr_range.start.wrapping_sub(offset),
            addr_range,
            offset,
            pathname: pathname.into(),
            root: root.into(),
            object_file: None,
        }
    }

    /// Opens the mapping with its backing object file.
    pub fn with_object_file(mut self, object_file: Arc<ObjectFile>) -> Self {
        self.object_file = Some(object_file);
        self
    }

    /// Overrides the normalization base of the mapping.
    pub fn with_base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    /// Returns the virtual address range of the mapping.
    pub fn addr_range(&self) -> &Range<u64> {
        &self.addr_range
    }

    /// Returns the offset of the mapping within the backing file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the path name of the mapping.
    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    /// Returns the root directory from which the backing file is reachable.
    ///
    /// This accounts for the mount namespace of the process (e.g.,
    /// `/proc/<pid>/root`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the normalization base of the mapping.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns the backing object file.
    pub fn object_file(&self) -> Option<&Arc<ObjectFile>> {
        self.object_file.as_ref()
    }

    /// Returns whether the backing object file could be resolved.
    pub fn is_open(&self) -> bool {
        self.object_file.is_some()
    }

    /// Returns whether the mapping contains the given address.
    pub fn contains(&self, addr: u64) -> bool {
        self.addr_range.contains(&addr)
    }

    /// Translates a virtual address into the object file's address space.
    pub fn normalize(&self, addr: u64) -> crate::Result<u64> {
        self.object_file
            .as_ref()
            .filter(|_| self.contains(addr))
            .and_then(|_| addr.checked_sub(self.base))
            .ok_or_else(|| crate::Error::AddressNotMapped {
                addr,
                pathname: self.pathname.clone(),
            })
    }
}

/// Mappings of a process, ordered by start address.
#[derive(Debug, Clone, Default)]
pub struct Mappings(Vec<Mapping>);

impl Mappings {
    /// Returns the mapping containing the given address.
    pub fn mapping_for_addr(&self, addr: u64) -> Option<&Mapping> {
        let idx = self
            .0
            .partition_point(|m| m.addr_range.start <= addr)
            .checked_sub(1)?;

        self.0.get(idx).filter(|m| m.contains(addr))
    }

    /// Returns an iterator over the mappings.
    pub fn iter(&self) -> std::slice::Iter<'_, Mapping> {
        self.0.iter()
    }

    /// Returns the number of mappings.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether there is no mapping.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Mapping>> for Mappings {
    fn from(mut mappings: Vec<Mapping>) -> Self {
        mappings.sort_by_key(|m| m.addr_range.start);
        Self(mappings)
    }
}

impl FromIterator<Mapping> for Mappings {
    fn from_iter<T: IntoIterator<Item = Mapping>>(iter: T) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

impl<'a> IntoIterator for &'a Mappings {
    type Item = &'a Mapping;
    type IntoIter = std::slice::Iter<'a, Mapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
