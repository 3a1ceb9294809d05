#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use sonda_cli::CliOpts;

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("SONDA_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    match sonda_cli::evaluate_command(cli.action, std::io::stdout()) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}
