//! tfpolicy - trust-framework policy build & deploy CLI
//!
//! ## Commands
//!
//! - `build`: Resolve templates for an environment into `<target>/<env>`,
//!   taking `Tenant` from the tenant's default domain when credentials are set
//! - `batches`: Print the inheritance-ordered upload plan
//! - `deploy`: Upload resolved policies batch by batch
//! - `list`: List policies stored in the tenant
//! - `delete`: Delete every policy stored in the tenant

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tfpolicy_core::{PolicyService, PolicyTransport, TenantDirectory, UploadOptions};
use tfpolicy_graph::{
    GraphClient, GraphConfig, GraphCredentials, CLIENT_ID_ENV, CLIENT_SECRET_ENV, TENANT_ID_ENV,
};
use tracing::{debug, info, Level};

#[derive(Parser)]
#[command(name = "tfpolicy")]
#[command(author = "Stevedores Org")]
#[command(version = tfpolicy_core::VERSION)]
#[command(about = "Build and deploy trust-framework policies", long_about = None)]
struct Cli {
    /// Environment configuration file (YAML)
    #[arg(long, global = true, default_value = "environments.yaml")]
    config: PathBuf,

    /// Directory containing policy templates
    #[arg(long, global = true, default_value = "src")]
    source: PathBuf,

    /// Directory receiving resolved policies, one subdirectory per environment
    #[arg(long, global = true, default_value = "build")]
    target: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve templates for an environment
    Build {
        /// Environment name from the config file
        environment: String,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Show the upload batches for a built environment
    Batches { environment: String },

    /// Upload a built environment in inheritance order
    Deploy {
        environment: String,

        /// Deadline for each individual upload
        #[arg(long)]
        timeout_secs: Option<u64>,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// List policies stored in the tenant
    List {
        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Delete every policy stored in the tenant
    Delete {
        /// Confirm deletion of all remote policies
        #[arg(long)]
        yes: bool,

        #[command(flatten)]
        credentials: CredentialArgs,
    },
}

#[derive(Args)]
struct CredentialArgs {
    /// Directory (tenant) id of the app registration
    #[arg(long, env = TENANT_ID_ENV)]
    tenant_id: Option<String>,

    /// Application (client) id
    #[arg(long, env = CLIENT_ID_ENV)]
    client_id: Option<String>,

    /// Client secret
    #[arg(long, env = CLIENT_SECRET_ENV, hide_env_values = true)]
    client_secret: Option<String>,
}

impl CredentialArgs {
    fn into_client(self) -> Result<GraphClient> {
        let credentials =
            GraphCredentials::new(self.tenant_id, self.client_id, self.client_secret)?;
        GraphClient::new(credentials, GraphConfig::default())
            .context("Failed to create Graph client")
    }

    fn into_transport(self) -> Result<Arc<dyn PolicyTransport>> {
        Ok(Arc::new(self.into_client()?))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tfpolicy_core::init_tracing(cli.json, level);

    // Remote-only commands do not need the environment file.
    let service = match cli.command {
        Commands::List { .. } | Commands::Delete { .. } => {
            PolicyService::new(Vec::new(), &cli.source, &cli.target)?
        }
        _ => PolicyService::from_config_file(&cli.config, &cli.source, &cli.target)
            .with_context(|| {
                format!("Failed to load environments from {}", cli.config.display())
            })?,
    };

    run(&service, cli.command).await
}

async fn run(service: &PolicyService, command: Commands) -> Result<()> {
    match command {
        Commands::Build {
            environment,
            credentials,
        } => {
            let client = match credentials.into_client() {
                Ok(client) => Some(client),
                Err(e) => {
                    debug!(error = %format!("{e:#}"), "no Graph client, using configured settings");
                    None
                }
            };
            let directory = client.as_ref().map(|c| c as &dyn TenantDirectory);
            cmd_build(service, &environment, directory).await
        }
        Commands::Batches { environment } => cmd_batches(service, &environment),
        Commands::Deploy {
            environment,
            timeout_secs,
            credentials,
        } => {
            let transport = credentials.into_transport()?;
            cmd_deploy(service, &environment, transport, timeout_secs).await
        }
        Commands::List { credentials } => {
            cmd_list(service, credentials.into_transport()?.as_ref()).await
        }
        Commands::Delete { yes, credentials } => {
            if !yes {
                bail!("Refusing to delete every remote policy without --yes");
            }
            cmd_delete(service, credentials.into_transport()?.as_ref()).await
        }
    }
}

/// Build resolved policies for one environment
async fn cmd_build(
    service: &PolicyService,
    environment: &str,
    directory: Option<&dyn TenantDirectory>,
) -> Result<()> {
    let report = match directory {
        Some(directory) => service.build_policies_for_tenant(environment, directory).await,
        None => service.build_policies(environment),
    }
    .with_context(|| format!("Failed to build environment '{}'", environment))?;

    for written in &report.written {
        println!("{}  {}", &written.digest[..12], written.path.display());
    }
    for removed in &report.removed {
        println!("removed stale {}", removed.display());
    }
    println!(
        "Built {} policies for '{}' in {}",
        report.len(),
        environment,
        report.target_dir.display()
    );

    Ok(())
}

/// Print the upload plan
fn cmd_batches(service: &PolicyService, environment: &str) -> Result<()> {
    let batches = service
        .batches(environment)
        .with_context(|| format!("Failed to plan batches for '{}'", environment))?;

    if batches.is_empty() {
        println!("No policies found for '{}'", environment);
        return Ok(());
    }

    for (index, batch) in batches.iter().enumerate() {
        println!("batch {}:", index);
        for policy in batch {
            match policy.parent_id() {
                Some(parent) => println!("  {} <- {}", policy.id(), parent),
                None => println!("  {}", policy.id()),
            }
        }
    }

    Ok(())
}

/// Upload a built environment
async fn cmd_deploy(
    service: &PolicyService,
    environment: &str,
    transport: Arc<dyn PolicyTransport>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let options = UploadOptions {
        call_timeout: timeout_secs.map(Duration::from_secs),
    };
    let report = service
        .deploy_policies(environment, transport, options)
        .await
        .with_context(|| format!("Failed to deploy environment '{}'", environment))?;

    for batch in &report.batches {
        for policy_id in &batch.uploaded {
            println!("uploaded {} (batch {})", policy_id, batch.index);
        }
    }
    info!(environment = %environment, uploaded = report.uploaded_count(), "deploy complete");
    println!(
        "Deployed {} policies to '{}' in {} batches",
        report.uploaded_count(),
        environment,
        report.batches.len()
    );

    Ok(())
}

/// List remote policies
async fn cmd_list(service: &PolicyService, transport: &dyn PolicyTransport) -> Result<()> {
    let ids = service
        .list_policies(transport)
        .await
        .context("Failed to list policies")?;

    if ids.is_empty() {
        println!("No policies found.");
        return Ok(());
    }
    for id in ids {
        println!("{}", id);
    }

    Ok(())
}

/// Delete every remote policy
async fn cmd_delete(service: &PolicyService, transport: &dyn PolicyTransport) -> Result<()> {
    let deleted = service
        .delete_policies(transport)
        .await
        .context("Failed to delete policies")?;

    for id in &deleted {
        println!("deleted {}", id);
    }
    println!("Deleted {} policies", deleted.len());

    Ok(())
}
