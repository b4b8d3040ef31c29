//! CLI configuration and argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::prompt::ConfirmPolicy;
use crate::upgrade::UpgradeRequest;
use crate::upgrade::mutator::DEFAULT_MAX_ATTEMPTS;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Milvus custom resource upgrade CLI tool.
///
/// Checks Pulsar and Etcd compatibility for the target version, then
/// updates the Milvus resource so the Milvus operator rolls out the new image.
#[derive(Parser, Debug, Clone)]
#[command(name = "milvus-upgrade")]
#[command(about = "Milvus custom resource upgrade CLI tool")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Kubeconfig file, or a path list like KUBECONFIG [default: KUBECONFIG, ~/.kube/config]
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubernetes context to use
    #[arg(long, global = true, env = "KUBECONFIG_CONTEXT")]
    pub context: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        global = true,
        default_value = "warn",
        env = "MILVUS_UPGRADE_LOG_LEVEL"
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upgrade a Milvus instance to a target version
    #[command(after_help = r#"Examples:
  milvus-upgrade upgrade -i my-release -n milvus -t v2.5.4
  milvus-upgrade upgrade -i my-release -t 2.5.4 --dry-run
  milvus-upgrade upgrade -i my-release -t 2.5.4 --confirm yes"#)]
    Upgrade(UpgradeArgs),

    /// Check dependency compatibility for a target version without changing anything
    Check {
        /// Milvus instance name
        #[arg(short, long)]
        instance: String,

        /// Namespace of the Milvus instance
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Target Milvus version (e.g. v2.5.4)
        #[arg(short, long)]
        target_version: String,

        /// Report format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct UpgradeArgs {
    /// Milvus instance name
    #[arg(short, long)]
    pub instance: String,

    /// Namespace of the Milvus instance
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Current Milvus version [default: detected from the running image tag]
    #[arg(short, long)]
    pub source_version: Option<String>,

    /// Target Milvus version (e.g. v2.5.4)
    #[arg(short, long)]
    pub target_version: String,

    /// Image repository for the new image [default: repository of the running image]
    #[arg(long)]
    pub image_repo: Option<String>,

    /// Allow downgrades without confirmation
    #[arg(long, default_value = "false")]
    pub force: bool,

    /// Skip Pulsar and Etcd compatibility checks
    #[arg(long, default_value = "false")]
    pub skip_checks: bool,

    /// Show planned changes without executing
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// How to answer confirmation prompts
    #[arg(long, value_enum, default_value_t = ConfirmPolicy::Prompt)]
    pub confirm: ConfirmPolicy,

    /// Attempts per write before a resourceVersion conflict fails the upgrade
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_conflict_retries: u32,
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub log_level: String,
    pub command: Command,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        Self {
            kubeconfig: args.kubeconfig,
            context: args.context,
            log_level: args.log_level,
            command: args.command,
        }
    }
}

impl UpgradeArgs {
    /// Build the request the orchestrator runs. Blank optional values count as unset.
    pub fn to_request(&self) -> UpgradeRequest {
        UpgradeRequest {
            source_version: non_blank(self.source_version.as_deref()),
            image_repo: non_blank(self.image_repo.as_deref()),
            force: self.force,
            skip_checks: self.skip_checks,
            dry_run: self.dry_run,
            ..UpgradeRequest::new(&self.instance, &self.namespace, &self.target_version)
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
