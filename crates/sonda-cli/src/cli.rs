use std::num::ParseIntError;

/// The Sonda profiling agent.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

/// The command to run.
#[derive(clap::Subcommand, Debug, PartialEq)]
pub enum CliAction {
    /// Command to print the executable mappings of a process.
    Mappings {
        /// Configuration common to all commands.
        #[clap(flatten)]
        common: CliCommon,
    },

    /// Command to normalize addresses of a process.
    Normalize {
        /// Configuration common to all commands.
        #[clap(flatten)]
        common: CliCommon,

        /// Addresses to normalize (hexadecimal if prefixed with `0x`).
        #[clap(required = true, value_parser = parse_addr)]
        addrs: Vec<u64>,
    },

    /// Command to upload the debug information of a process' object files.
    Upload {
        /// Configuration common to all commands.
        #[clap(flatten)]
        common: CliCommon,
    },
}

/// Configuration common to all commands.
#[derive(clap::Parser, Debug, PartialEq)]
pub struct CliCommon {
    /// Agent configuration (KDL format).
    ///
    /// If it ends with `.kdl`, it is treated as a path to a configuration
    /// file. Otherwise it is directly parsed as inline KDL-formatted
    /// configuration.
    #[clap(short, long, value_name = "CONTENT/PATH")]
    pub config: Option<String>,

    /// ID of the process.
    #[clap(short, long)]
    pub pid: u32,
}

impl CliAction {
    /// Returns the configuration common to all commands.
    pub fn common(&self) -> &CliCommon {
        match self {
            Self::Mappings { common } | Self::Normalize { common, .. } | Self::Upload { common } => {
                common
            }
        }
    }
}

impl CliOpts {
    /// Parses the CLI from the command-line.
    ///
    /// # Warning
    ///
    /// Exits on error.
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}

fn parse_addr(s: &str) -> Result<u64, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}
