use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sonda_process::{BuildId, DebugInfoService, Mapping, MappingProvider, Mappings, ObjectFile};

pub const MAPPING_SIZE: u64 = 0x1000;

/// Returns an open mapping of the given object file, starting at `start`.
pub fn open_mapping(start: u64, path: &str) -> Mapping {
    let build_id = BuildId::from_bytes(path.as_bytes());
    let object_file = ObjectFile::new(path, Some(build_id));

    Mapping::new(start..start + MAPPING_SIZE, 0, path, "/")
        .with_object_file(Arc::new(object_file))
        .with_base(start)
}

/// Returns a closed mapping, starting at `start`.
pub fn closed_mapping(start: u64, pathname: &str) -> Mapping {
    Mapping::new(start..start + MAPPING_SIZE, 0, pathname, "/")
}

#[derive(Debug, thiserror::Error)]
#[error("process {0} not found")]
pub struct ProcessNotFound(pub u32);

struct ProviderState {
    mappings: Mappings,
    delay: Duration,
    failing: bool,
    calls: AtomicUsize,
}

/// Mapping provider returning the same mappings for every process.
#[derive(Clone)]
pub struct FakeProvider(Arc<ProviderState>);

impl FakeProvider {
    pub fn new(mappings: impl Into<Mappings>) -> Self {
        Self::build(mappings.into(), Duration::ZERO, false)
    }

    pub fn with_delay(mappings: impl Into<Mappings>, delay: Duration) -> Self {
        Self::build(mappings.into(), delay, false)
    }

    pub fn failing(delay: Duration) -> Self {
        Self::build(Mappings::default(), delay, true)
    }

    fn build(mappings: Mappings, delay: Duration, failing: bool) -> Self {
        Self(Arc::new(ProviderState {
            mappings,
            delay,
            failing,
            calls: AtomicUsize::new(0),
        }))
    }

    pub fn calls(&self) -> usize {
        self.0.calls.load(Ordering::SeqCst)
    }
}

impl MappingProvider for FakeProvider {
    type Error = ProcessNotFound;

    async fn mappings_for_pid(&self, pid: u32) -> Result<Mappings, Self::Error> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.0.delay).await;

        if self.0.failing {
            Err(ProcessNotFound(pid))
        } else {
            Ok(self.0.mappings.clone())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DebugInfoError {
    #[error("failed to extract {}", .0.display())]
    Extract(PathBuf),

    #[error("store rejected {}", .0.display())]
    Upload(PathBuf),
}

#[derive(Default)]
struct DebugInfoState {
    upload_delay: Duration,
    extract_failures: HashSet<PathBuf>,
    upload_failures: Mutex<HashMap<PathBuf, u32>>,
    extracted: Mutex<Vec<PathBuf>>,
    uploaded: Mutex<Vec<PathBuf>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Debug information service recording extractions and uploads.
#[derive(Clone, Default)]
pub struct FakeDebugInfo(Arc<DebugInfoState>);

impl FakeDebugInfo {
    pub fn builder() -> FakeDebugInfoBuilder {
        FakeDebugInfoBuilder(DebugInfoState::default())
    }

    pub fn extracted(&self) -> Vec<PathBuf> {
        self.0.extracted.lock().unwrap().clone()
    }

    pub fn uploaded(&self) -> Vec<PathBuf> {
        let mut uploaded = self.0.uploaded.lock().unwrap().clone();
        uploaded.sort();
        uploaded
    }

    pub fn attempts(&self) -> usize {
        self.0.attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.0.max_in_flight.load(Ordering::SeqCst)
    }
}

pub struct FakeDebugInfoBuilder(DebugInfoState);

impl FakeDebugInfoBuilder {
    pub fn upload_delay(mut self, delay: Duration) -> Self {
        self.0.upload_delay = delay;
        self
    }

    pub fn failing_extraction(mut self, path: &str) -> Self {
        self.0.extract_failures.insert(path.into());
        self
    }

    /// Makes the first `times` uploads of `path` fail.
    pub fn failing_upload(self, path: &str, times: u32) -> Self {
        self.0
            .upload_failures
            .lock()
            .unwrap()
            .insert(path.into(), times);
        self
    }

    pub fn build(self) -> FakeDebugInfo {
        FakeDebugInfo(Arc::new(self.0))
    }
}

impl DebugInfoService for FakeDebugInfo {
    type Error = DebugInfoError;

    async fn extract_or_find(
        &self,
        _root: &Path,
        object_file: &ObjectFile,
    ) -> Result<(), Self::Error> {
        let path = object_file.path().to_path_buf();

        if self.0.extract_failures.contains(&path) {
            return Err(DebugInfoError::Extract(path));
        }

        self.0.extracted.lock().unwrap().push(path);
        Ok(())
    }

    async fn upload(&self, object_file: &ObjectFile) -> Result<(), Self::Error> {
        let path = object_file.path().to_path_buf();

        self.0.attempts.fetch_add(1, Ordering::SeqCst);

        let in_flight = self.0.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        tokio::time::sleep(self.0.upload_delay).await;

        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail = match self.0.upload_failures.lock().unwrap().get_mut(&path) {
            Some(times) if *times > 0 => {
                *times -= 1;
                true
            }
            _ => false,
        };

        if fail {
            return Err(DebugInfoError::Upload(path));
        }

        self.0.uploaded.lock().unwrap().push(path);
        Ok(())
    }
}
