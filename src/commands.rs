//! CLI command handlers.
//!
//! Every command runs against an in-memory account, seeded from a JSON
//! snapshot when one is given. Provider calls are logged as they happen.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use nimbus_provider::{InMemoryProvider, ProviderCall, Snapshot, TracingProvider};
use nimbus_reconciler::{DeployConfig, DeployReport, Reconciler, ResourceState, ServiceInfo};
use tracing::info;

use crate::cli::{Commands, DocumentFormat, Target};

type Account = TracingProvider<InMemoryProvider>;

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Deploy {
            target,
            save_snapshot,
            strict,
            json,
        } => cmd_deploy(&target, save_snapshot.as_deref(), strict, json).await,

        Commands::Info { target, json } => cmd_info(&target, json).await,

        Commands::RenderGateway { target, format } => cmd_render_gateway(&target, format).await,
    }
}

async fn cmd_deploy(
    target: &Target,
    save_snapshot: Option<&Path>,
    strict: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(&target.config)?;
    let artifacts = nimbus_reconciler::load_artifacts(&config, &base_dir(&target.config))
        .context("Failed to load function artifacts")?;
    let account = open_account(target.snapshot.as_deref())?;
    let reconciler = Reconciler::new(account.clone());

    let report = reconciler
        .deploy(&config, &artifacts)
        .await
        .context("Deploy failed")?;
    let mutations = account.inner().mutations().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_journal(&mutations);
        print_report(&report);
    }

    if let Some(path) = save_snapshot {
        write_snapshot(path, &account.inner().snapshot().await)?;
        info!(path = %path.display(), "Saved account snapshot");
    }

    if strict && !report.converged {
        bail!("{} resource(s) failed to sync", report.failures.len());
    }
    Ok(())
}

async fn cmd_info(target: &Target, json: bool) -> Result<()> {
    let config = load_config(&target.config)?;
    let account = open_account(target.snapshot.as_deref())?;
    let info = Reconciler::new(account)
        .describe(&config)
        .await
        .context("Failed to describe service")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(&info);
    }
    Ok(())
}

async fn cmd_render_gateway(target: &Target, format: DocumentFormat) -> Result<()> {
    let config = load_config(&target.config)?;
    let account = open_account(target.snapshot.as_deref())?;
    let document = Reconciler::new(account)
        .render_gateway(&config)
        .await
        .context("Failed to render gateway document")?;

    let Some(document) = document else {
        info!(service = %config.service, "Service declares no HTTP routes");
        return Ok(());
    };
    let rendered = match format {
        DocumentFormat::Json => document.to_json()?,
        DocumentFormat::Yaml => document.to_yaml()?,
    };
    println!("{rendered}");
    Ok(())
}

fn load_config(path: &Path) -> Result<DeployConfig> {
    let config = DeployConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Directory that relative artifact paths are resolved against.
fn base_dir(config: &Path) -> PathBuf {
    config
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn open_account(snapshot: Option<&Path>) -> Result<Arc<Account>> {
    let snapshot = match snapshot {
        Some(path) => nimbus_core::read_json::<Snapshot>(path)
            .with_context(|| format!("Failed to read account snapshot {}", path.display()))?,
        None => Snapshot::default(),
    };
    Ok(Arc::new(TracingProvider::new(InMemoryProvider::from_snapshot(
        snapshot,
    ))))
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let body = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write account snapshot {}", path.display()))
}

fn print_journal(mutations: &[ProviderCall]) {
    if mutations.is_empty() {
        println!("No changes to the account.");
        return;
    }
    println!("Provider calls:");
    for call in mutations {
        println!("  {}", describe_call(call));
    }
}

fn describe_call(call: &ProviderCall) -> String {
    match call {
        ProviderCall::CreateServiceAccount { request } => {
            format!("create service account {}", request.name)
        }
        ProviderCall::DeleteServiceAccount { id } => format!("delete service account {id}"),
        ProviderCall::AddRoleBinding { account_id, role } => {
            format!("bind role {role} to {account_id}")
        }
        ProviderCall::RemoveRoleBinding { account_id, role } => {
            format!("unbind role {role} from {account_id}")
        }
        ProviderCall::CreateQueue { request } => format!("create queue {}", request.name),
        ProviderCall::CreateBucket { request } => format!("create bucket {}", request.name),
        ProviderCall::CreateRegistry { request } => {
            format!("create container registry {}", request.name)
        }
        ProviderCall::PutObject { bucket, key, size } => {
            format!("upload {size} bytes to {bucket}/{key}")
        }
        ProviderCall::CreateFunction { request } => format!("create function {}", request.name),
        ProviderCall::UpdateFunction { id, request } => {
            format!("update function {} ({id})", request.name)
        }
        ProviderCall::CreateTrigger { request } => format!("create trigger {}", request.name),
        ProviderCall::DeleteTrigger { id } => format!("delete trigger {id}"),
        ProviderCall::CreateApiGateway { request } => {
            format!("create api gateway {}", request.name)
        }
        ProviderCall::UpdateApiGateway { id, request } => {
            format!("update api gateway {} ({id})", request.name)
        }
        other => other.operation().to_string(),
    }
}

fn print_report(report: &DeployReport) {
    println!("Service {} ({}):", report.service, report.stage);
    for entry in &report.outcomes {
        println!("  {:<10} {} {}", entry.outcome.label(), entry.kind, entry.name);
    }
    for failure in &report.failures {
        println!("  {:<10} {} {}: {}", "failed", failure.kind, failure.name, failure.error);
    }
    println!(
        "{} changed, {} failed",
        report.changed_count(),
        report.failures.len()
    );
}

fn print_info(info: &ServiceInfo) {
    println!("Service {} ({}):", info.service, info.stage);
    for resource in &info.resources {
        let state = match &resource.state {
            ResourceState::Deployed { id } => id.as_str(),
            ResourceState::NotDeployed => "not deployed",
        };
        match &resource.url {
            Some(url) => println!("  {} {}: {state} {url}", resource.kind, resource.name),
            None => println!("  {} {}: {state}", resource.kind, resource.name),
        }
    }
    if let Some(endpoint) = &info.endpoint {
        println!("Endpoint: https://{endpoint}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const CONFIG: &str = "
service: shop
functions:
  api:
    handler: index.handler
    runtime: python311
    package: api.zip
    events:
      - http:
          method: get
          path: /orders
";

    #[tokio::test]
    async fn test_deploy_then_info_from_saved_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("nimbus.yaml");
        std::fs::write(&config, CONFIG).expect("write config");
        std::fs::write(dir.path().join("api.zip"), b"zip").expect("write artifact");
        let snapshot = dir.path().join("account.json");

        let target = Target {
            config: config.clone(),
            snapshot: None,
        };
        cmd_deploy(&target, Some(&snapshot), true, false)
            .await
            .expect("deploy");

        let saved: Snapshot = nimbus_core::read_json(&snapshot).expect("snapshot");
        assert_eq!(saved.functions.len(), 1);
        assert_eq!(saved.api_gateways.len(), 1);

        let account = open_account(Some(&snapshot)).expect("account");
        let info = Reconciler::new(account)
            .describe(&load_config(&config).expect("config"))
            .await
            .expect("describe");
        assert!(info.endpoint.is_some());
    }

    #[tokio::test]
    async fn test_missing_config_names_the_file() {
        let target = Target {
            config: PathBuf::from("/nonexistent/nimbus.yaml"),
            snapshot: None,
        };

        let err = cmd_info(&target, false).await.expect_err("missing config");
        assert!(format!("{err:#}").contains("/nonexistent/nimbus.yaml"));
    }

    #[test]
    fn test_base_dir_of_bare_file_name() {
        assert_eq!(base_dir(Path::new("nimbus.yaml")), PathBuf::from(""));
        assert_eq!(base_dir(Path::new("svc/nimbus.yaml")), PathBuf::from("svc"));
    }
}
