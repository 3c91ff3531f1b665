use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "netkeep")]
#[command(version)]
#[command(about = "Back up, compare, validate and deploy network device configurations", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Inventory file (default: ~/.config/netkeep/netkeep.toml)
    #[arg(short, long, global = true, env = "NETKEEP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Back up running configurations
    Backup(BackupArgs),

    /// Compare two configuration files
    Compare(CompareArgs),

    /// Deploy a configuration to a device
    Deploy(DeployArgs),

    /// Validate a configuration against compliance rules
    Validate(ValidateArgs),

    /// Report on devices, snapshots and deployments
    Report(ReportArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct BackupArgs {
    /// Only back up this device
    #[arg(short, long)]
    pub device: Option<String>,

    /// Number of devices backed up in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,
}

#[derive(Parser)]
pub struct CompareArgs {
    /// Old configuration
    pub file1: PathBuf,

    /// New configuration
    pub file2: PathBuf,

    /// Lines of context around each change
    #[arg(short = 'U', long, default_value = "3")]
    pub context: usize,

    /// Only print the change counts
    #[arg(short, long)]
    pub summary: bool,
}

#[derive(Parser)]
pub struct DeployArgs {
    /// Target device
    #[arg(short, long)]
    pub device: String,

    /// Configuration file to deploy
    #[arg(short, long)]
    pub file: PathBuf,

    /// Validate and preview without contacting the device
    #[arg(long)]
    pub dry_run: bool,

    /// Compliance rules (overrides settings.rules)
    #[arg(short, long)]
    pub rules: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser)]
pub struct ValidateArgs {
    /// Configuration file
    pub config_file: PathBuf,

    /// Rules file (JSON array or TOML [[rules]])
    pub rules: PathBuf,
}

#[derive(Parser)]
pub struct ReportArgs {
    /// Only report on this device, including its snapshot history
    #[arg(short, long)]
    pub device: Option<String>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_args() {
        let cli = Cli::parse_from([
            "netkeep", "-vv", "deploy", "--device", "core-1", "--file", "new.cfg", "--dry-run",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Deploy(args) => {
                assert_eq!(args.device, "core-1");
                assert!(args.dry_run);
                assert!(!args.yes);
                assert!(args.rules.is_none());
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_compare_defaults() {
        let cli = Cli::parse_from(["netkeep", "compare", "a.cfg", "b.cfg"]);
        match cli.command {
            Command::Compare(args) => {
                assert_eq!(args.context, 3);
                assert!(!args.summary);
            }
            _ => panic!("expected compare"),
        }
    }
}
