//! Kubernetes client builder with kubeconfig path and context support.

use std::path::Path;

use kube::config::Kubeconfig;
use tracing::debug;

use crate::error::UpgradeError;

/// Build a Kubernetes client.
///
/// An explicit kubeconfig path and/or context take precedence; otherwise the
/// default discovery (`KUBECONFIG`, `~/.kube/config`, in-cluster) is used.
pub async fn build_client(
    kubeconfig: Option<&Path>,
    context: Option<&str>,
) -> Result<kube::Client, UpgradeError> {
    if kubeconfig.is_none() && context.is_none() {
        debug!("Using default kubeconfig discovery");
        return kube::Client::try_default()
            .await
            .map_err(|e| UpgradeError::Kubeconfig(e.to_string()));
    }

    let kc = match kubeconfig {
        Some(paths) => {
            debug!("Using kubeconfig: {}", paths.display());
            load_kubeconfig(paths)?
        }
        None => Kubeconfig::read().map_err(|e| UpgradeError::Kubeconfig(e.to_string()))?,
    };

    if let Some(ctx) = context {
        debug!("Using kubeconfig context: {}", ctx);
    }

    let options = kube::config::KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    let config = kube::Config::from_custom_kubeconfig(kc, &options)
        .await
        .map_err(|e| UpgradeError::Kubeconfig(describe(context, e)))?;

    kube::Client::try_from(config).map_err(|e| UpgradeError::Kubeconfig(describe(context, e)))
}

/// Read a kubeconfig path list (`KUBECONFIG` syntax), merging the files in order.
///
/// Earlier files win for `current-context` and duplicate entries.
pub fn load_kubeconfig(paths: &Path) -> Result<Kubeconfig, UpgradeError> {
    let mut merged: Option<Kubeconfig> = None;
    for path in std::env::split_paths(paths.as_os_str()) {
        if path.as_os_str().is_empty() {
            continue;
        }
        let next = Kubeconfig::read_from(&path)
            .map_err(|e| UpgradeError::Kubeconfig(format!("{}: {}", path.display(), e)))?;
        merged = Some(match merged {
            Some(kc) => kc
                .merge(next)
                .map_err(|e| UpgradeError::Kubeconfig(format!("{}: {}", path.display(), e)))?,
            None => next,
        });
    }
    merged.ok_or_else(|| UpgradeError::Kubeconfig("empty kubeconfig path".to_string()))
}

fn describe(context: Option<&str>, err: impl std::fmt::Display) -> String {
    match context {
        Some(ctx) => format!("context '{}': {}", ctx, err),
        None => err.to_string(),
    }
}

/// Get the effective context name from kubeconfig.
pub fn current_context(kubeconfig: Option<&Path>, context: Option<&str>) -> String {
    if let Some(ctx) = context {
        return ctx.to_string();
    }

    let kc = match kubeconfig {
        Some(paths) => load_kubeconfig(paths).ok(),
        None => Kubeconfig::read().ok(),
    };
    kc.and_then(|kc| kc.current_context)
        .unwrap_or_else(|| "unknown".to_string())
}
