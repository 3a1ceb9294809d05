use std::io::Write;
use std::sync::Arc;

use miette::IntoDiagnostic;
use sonda_process::{
    BuildId, DebugInfoService, InfoManager, Mapping, MappingProvider, NeedsDebugInfo, Uploader,
};
use sonda_procfs::ProcfsMappingProvider;
use tokio_util::sync::CancellationToken;

use crate::{AgentConfig, CliAction};

type ManagerBuilder = sonda_process::Builder<NeedsDebugInfo<ProcfsMappingProvider>>;

/// Runs the given command, writing its report into `output`.
///
/// Returns the exit code of the command.
pub fn evaluate_command(action: CliAction, output: impl Write) -> miette::Result<i32> {
    let config = AgentConfig::parse(action.common().config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    runtime.block_on(async move {
        let token = CancellationToken::new();

        let ctrl_c = {
            let token = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupted");
                    token.cancel();
                }
            })
        };

        let res = match action {
            CliAction::Mappings { common } => evaluate_mappings(&config, common.pid, output).await,
            CliAction::Normalize { common, addrs } => {
                evaluate_normalize(&config, common.pid, &addrs, &token, output).await
            }
            CliAction::Upload { common } => {
                evaluate_upload(&config, common.pid, &token, output).await
            }
        };

        ctrl_c.abort();

        res
    })
}

/// Prints the executable mappings of a process.
pub async fn evaluate_mappings(
    config: &AgentConfig,
    pid: u32,
    mut output: impl Write,
) -> miette::Result<i32> {
    let mappings = provider(config)
        .mappings_for_pid(pid)
        .await
        .into_diagnostic()?;

    for mapping in &mappings {
        writeln!(output, "{}", MappingRow(mapping)).into_diagnostic()?;
    }

    Ok(0)
}

/// Normalizes addresses of a process.
///
/// Debug information uploads are triggered as a side effect, when the local
/// store is configured.
pub async fn evaluate_normalize(
    config: &AgentConfig,
    pid: u32,
    addrs: &[u64],
    token: &CancellationToken,
    output: impl Write,
) -> miette::Result<i32> {
    let builder = manager_builder(config);

    match config.local_store() {
        Some(store) => {
            let manager = builder.with_debuginfo(store).build();
            normalize(manager, pid, addrs, token, output).await
        }
        None => {
            let manager = builder.without_debuginfo().build();
            normalize(manager, pid, addrs, token, output).await
        }
    }
}

async fn normalize<D>(
    manager: InfoManager<ProcfsMappingProvider, D>,
    pid: u32,
    addrs: &[u64],
    token: &CancellationToken,
    mut output: impl Write,
) -> miette::Result<i32>
where
    D: DebugInfoService + Send + Sync + 'static,
{
    manager.obtain_info(pid, token).await.into_diagnostic()?;

    let info = manager.info_for_pid(pid).into_diagnostic()?;

    let mut exit_code = 0;

    for &addr in addrs {
        let res = match info.normalize(addr) {
            Ok(normalized) => writeln!(output, "{addr:#x} {normalized:#x}"),
            Err(e) => {
                exit_code = 1;
                writeln!(output, "{addr:#x} error: {e}")
            }
        };

        res.into_diagnostic()?;
    }

    Ok(exit_code)
}

/// Uploads the debug information of a process' object files, and waits for
/// the uploads to complete.
pub async fn evaluate_upload(
    config: &AgentConfig,
    pid: u32,
    token: &CancellationToken,
    mut output: impl Write,
) -> miette::Result<i32> {
    let store = config
        .local_store()
        .ok_or_else(|| miette::miette!("uploads require both `debuginfo-dir` and `upload-dir`"))?;

    let mappings = provider(config)
        .mappings_for_pid(pid)
        .await
        .into_diagnostic()?;

    let uploader = Uploader::new(
        Arc::new(store),
        config.upload.concurrency,
        config.upload.retry_policy(),
    );

    let batch = uploader.ensure_uploaded(pid, &mappings, token).await;

    match batch.wait().await {
        Ok(()) => {
            writeln!(output, "{} mappings uploaded", mappings.len()).into_diagnostic()?;
            Ok(0)
        }
        Err(errors) => {
            let uploaded = mappings.len().saturating_sub(errors.errors().len());
            writeln!(output, "{uploaded} mappings uploaded, {errors}").into_diagnostic()?;
            Ok(1)
        }
    }
}

fn provider(config: &AgentConfig) -> ProcfsMappingProvider {
    ProcfsMappingProvider::new(&config.procfs_root)
}

fn manager_builder(config: &AgentConfig) -> ManagerBuilder {
    InfoManager::builder()
        .with_mapping_provider(provider(config))
        .profiling_duration(config.profiling_duration())
        .ttl_multiplier(config.ttl_multiplier)
        .max_entries(config.max_entries)
        .upload_concurrency(config.upload.concurrency)
        .retry_policy(config.upload.retry_policy())
}

/// Row of the mappings table.
struct MappingRow<'a>(&'a Mapping);

impl std::fmt::Display for MappingRow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mapping = self.0;
        let range = mapping.addr_range();

        let build_id = mapping
            .object_file()
            .and_then(|object_file| object_file.build_id())
            .map_or("-", BuildId::as_str);

        write!(
            f,
            "{:016x}-{:016x} {:08x} base={:#x} {:<6} {:<40} {}",
            range.start,
            range.end,
            mapping.offset(),
            mapping.base(),
            if mapping.is_open() { "open" } else { "closed" },
            build_id,
            mapping.pathname(),
        )
    }
}
