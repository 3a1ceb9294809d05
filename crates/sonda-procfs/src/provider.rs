use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sonda_process::{Mapping, MappingProvider, Mappings, ObjectFile};

use crate::elf::ElfFile;
use crate::maps::{self, MapsEntry};

/// Default mount point of procfs.
pub const DEFAULT_PROCFS_ROOT: &str = "/proc";

/// Mapping provider reading `/proc/<pid>/maps`.
///
/// Only executable mappings backed by a file are reported. A mapping is open
/// when its backing file is a readable ELF file.
#[derive(Debug, Clone)]
pub struct ProcfsMappingProvider {
    procfs_root: PathBuf,
}

impl Default for ProcfsMappingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_PROCFS_ROOT)
    }
}

impl ProcfsMappingProvider {
    /// Creates a provider reading processes from the given procfs mount
    /// point.
    pub fn new(procfs_root: impl Into<PathBuf>) -> Self {
        Self {
            procfs_root: procfs_root.into(),
        }
    }

    /// Returns the procfs mount point.
    pub fn procfs_root(&self) -> &Path {
        &self.procfs_root
    }
}

impl MappingProvider for ProcfsMappingProvider {
    type Error = crate::Error;

    #[tracing::instrument(name = "ProcfsMappings", skip(self))]
    async fn mappings_for_pid(&self, pid: u32) -> crate::Result<Mappings> {
        let proc_dir = self.procfs_root.join(pid.to_string());
        let maps_path = proc_dir.join("maps");

        let content = tokio::fs::read_to_string(&maps_path)
            .await
            .map_err(|e| crate::Error::File(maps_path, e))?;

        let root = proc_dir.join("root");

        // mappings of the same file share their object file
        let mut elf_files = HashMap::<&str, Option<(Arc<ObjectFile>, ElfFile)>>::new();
        let mut mappings = Vec::new();

        for entry in maps::parse(&content)? {
            if !entry.executable || entry.pathname.is_empty() {
                continue;
            }

            if !entry.is_file_backed() {
                mappings.push(closed_mapping(&entry, &root));
                continue;
            }

            if !elf_files.contains_key(entry.pathname) {
                let elf_file = open_elf_file(&root, entry.pathname).await;
                elf_files.insert(entry.pathname, elf_file);
            }

            let mapping = match elf_files.get(entry.pathname) {
                Some(Some((object_file, elf_file))) => closed_mapping(&entry, &root)
                    .with_base(elf_file.base(&entry.addr_range, entry.offset))
                    .with_object_file(object_file.clone()),
                _ => closed_mapping(&entry, &root),
            };

            mappings.push(mapping);
        }

        tracing::debug!(count = mappings.len(), "executable mappings found");

        Ok(Mappings::from(mappings))
    }
}

fn closed_mapping(entry: &MapsEntry<'_>, root: &Path) -> Mapping {
    Mapping::new(entry.addr_range.clone(), entry.offset, entry.pathname, root)
}

async fn open_elf_file(root: &Path, pathname: &str) -> Option<(Arc<ObjectFile>, ElfFile)> {
    let host_path = root.join(pathname.trim_start_matches('/'));

    match ElfFile::open(&host_path).await {
        Ok(elf_file) => {
            let object_file = ObjectFile::new(pathname, elf_file.build_id().cloned());
            Some((Arc::new(object_file), elf_file))
        }
        Err(e) => {
            tracing::debug!(path = pathname, error = %e, "object file cannot be opened");
            None
        }
    }
}
