//! milvus-upgrade - Milvus custom resource upgrade CLI tool.
//!
//! Verifies that the in-cluster Pulsar and Etcd meet the minimum versions for
//! the target Milvus release, then patches the Milvus resource so the Milvus
//! operator performs the rollout.

mod config;
mod error;
mod k8s;
mod output;
mod prompt;
mod upgrade;
mod version;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use config::{Args, Command, Config, OutputFormat, UpgradeArgs};
use k8s::milvus::KubeMilvusHandle;
use prompt::ConfirmPolicy;
use upgrade::mutator::MutatorSettings;
use upgrade::orchestrator::UpgradeOrchestrator;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Config::from_args(args);

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    debug!("Starting milvus-upgrade");

    if let Err(e) = run(&config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(config: &Config) -> Result<()> {
    let kubeconfig = config.kubeconfig.as_deref();
    let context = config.context.as_deref();

    let client = k8s::client::build_client(kubeconfig, context).await?;
    let context_name = k8s::client::current_context(kubeconfig, context);
    debug!("Using context: {}", context_name);

    let handle = KubeMilvusHandle::new(client);

    match &config.command {
        Command::Upgrade(args) => run_upgrade(&handle, args).await,
        Command::Check {
            instance,
            namespace,
            target_version,
            output,
        } => {
            run_check(
                &handle,
                instance,
                namespace,
                target_version,
                *output,
                &context_name,
            )
            .await
        }
    }
}

/// Check dependencies, then patch the Milvus resource.
async fn run_upgrade(handle: &KubeMilvusHandle, args: &UpgradeArgs) -> Result<()> {
    let confirmer = args.confirm.confirmer();
    let settings = MutatorSettings {
        max_attempts: args.max_conflict_retries,
        ..MutatorSettings::default()
    };
    let orchestrator = UpgradeOrchestrator::new(handle, confirmer.as_ref(), settings);

    let request = args.to_request();
    let outcome = orchestrator.run(&request).await?;
    output::table::print_outcome(&outcome, &request.instance, &request.namespace);

    Ok(())
}

/// Report compatibility for a target version without prompting or writing.
async fn run_check(
    handle: &KubeMilvusHandle,
    instance: &str,
    namespace: &str,
    target_version: &str,
    output: OutputFormat,
    context_name: &str,
) -> Result<()> {
    let confirmer = ConfirmPolicy::No.confirmer();
    let orchestrator =
        UpgradeOrchestrator::new(handle, confirmer.as_ref(), MutatorSettings::default());

    let assessment = orchestrator
        .assess(namespace, instance, target_version)
        .await?;

    match output {
        OutputFormat::Table => {
            output::table::print_assessment(&assessment, instance, namespace, context_name)
        }
        OutputFormat::Json => output::json::print_assessment(&assessment, instance, namespace)?,
    }

    if assessment.report.has_blocking() {
        anyhow::bail!(
            "Milvus {}/{} cannot be upgraded to {} until its dependencies are upgraded",
            namespace,
            instance,
            assessment.target
        );
    }

    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
