//! fnctl - render and deploy function endpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use functions_core::providers::functions::{endpoint_from_function, FunctionsClient};
use functions_core::providers::run::{endpoint_from_service, RunClient};
use functions_core::{
    assign_hashes, field_masks, parse_endpoints, to_provider_resource, Apis, Config, Deployer,
    Endpoint, Platform,
};

/// fnctl - Reconcile function endpoints against managed functions, container
/// services and task queues.
#[derive(Parser)]
#[command(name = "fnctl")]
#[command(about = "Render and deploy serverless function endpoints")]
struct Cli {
    /// Project that every endpoint is deployed to, overriding the file.
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    /// `OAuth2` access token (or set `GOOGLE_OAUTH_ACCESS_TOKEN` env var).
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", default_value = "", hide_env_values = true)]
    token: String,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the provider resource and update mask of every endpoint.
    Render {
        /// Endpoints file (YAML or JSON).
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Print the field masks of a JSON document.
    Masks {
        /// JSON document.
        #[arg(long, short)]
        file: PathBuf,

        /// Map fields whose keys are data (comma-separated dot paths).
        #[arg(long, value_delimiter = ',')]
        no_recurse: Vec<String>,
    },

    /// Create or update every endpoint and apply its trigger side effects.
    Deploy {
        /// Endpoints file (YAML or JSON).
        #[arg(long, short)]
        file: PathBuf,

        /// Hash of the uploaded source. Endpoints whose fingerprint matches the
        /// deployed one are skipped.
        #[arg(long)]
        source_hash: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Render { file } => render(&load_endpoints(file, cli.project.as_deref())?),
        Commands::Masks { file, no_recurse } => masks(file, no_recurse),
        Commands::Deploy { file, source_hash } => {
            let mut endpoints = load_endpoints(file, cli.project.as_deref())?;
            if let Some(source_hash) = source_hash {
                assign_hashes(&mut endpoints, source_hash);
            }
            deploy(&cli.token, &endpoints).await
        }
    }
}

fn load_endpoints(path: &Path, project: Option<&str>) -> Result<Vec<Endpoint>> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut endpoints = parse_endpoints(&input)
        .with_context(|| format!("Failed to parse endpoints from {}", path.display()))?;
    if let Some(project) = project {
        for endpoint in &mut endpoints {
            endpoint.project = project.to_string();
        }
    }
    Ok(endpoints)
}

fn render(endpoints: &[Endpoint]) -> Result<()> {
    let mut rendered = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        let resource = to_provider_resource(endpoint)
            .with_context(|| format!("Failed to convert {endpoint}"))?;
        rendered.push(json!({
            "endpoint": endpoint.to_string(),
            "updateMask": resource.update_mask()?,
            "resource": resource,
        }));
    }
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

fn masks(path: &Path, no_recurse: &[String]) -> Result<()> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document: Value = serde_json::from_str(&input).context("Document is not valid JSON")?;
    let no_recurse: Vec<&str> = no_recurse.iter().map(String::as_str).collect();

    for mask in field_masks(&document, &no_recurse) {
        println!("{mask}");
    }
    Ok(())
}

async fn deploy(token: &str, endpoints: &[Endpoint]) -> Result<()> {
    if token.is_empty() {
        bail!("An access token is required: pass --token or set GOOGLE_OAUTH_ACCESS_TOKEN");
    }
    let config = Config::from_env();
    let apis = Apis::http(&config, token).context("Failed to create API clients")?;
    let have = existing_endpoints(&apis, &config, endpoints).await?;

    let deployer = Deployer::new(apis, config);
    let outcomes = deployer.deploy(endpoints, &have).await;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(action) => println!("✓ {} {action}", outcome.endpoint),
            Err(e) => {
                failed += 1;
                println!("✗ {} {e}", outcome.endpoint);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} endpoints failed to deploy", outcomes.len());
    }
    info!(count = outcomes.len(), "Deployment complete");
    Ok(())
}

/// Endpoints currently deployed in the projects `endpoints` target.
async fn existing_endpoints(
    apis: &Apis,
    config: &Config,
    endpoints: &[Endpoint],
) -> Result<Vec<Endpoint>> {
    let mut projects: Vec<&str> = endpoints.iter().map(|e| e.project.as_str()).collect();
    projects.sort_unstable();
    projects.dedup();

    let functions = FunctionsClient::new(Arc::clone(&apis.functions));
    let run = RunClient::new(Arc::clone(&apis.run), config.retry.clone());
    let mut have = Vec::new();

    for project in projects {
        let listing = functions
            .list_all(project)
            .await
            .with_context(|| format!("Failed to list functions in {project}"))?;
        for region in &listing.unreachable {
            warn!(project = %project, region = %region, "Region unreachable, its functions are treated as missing");
        }
        for function in &listing.functions {
            match endpoint_from_function(function) {
                Ok(endpoint) => have.push(endpoint),
                Err(e) => warn!(function = %function.name, error = %e, "Skipping unreadable function"),
            }
        }

        let services = run
            .list(project, "-")
            .await
            .with_context(|| format!("Failed to list services in {project}"))?;
        for service in &services {
            match endpoint_from_service(service) {
                // Services backing managed functions were read above.
                Ok(endpoint) if endpoint.platform == Platform::Run => {
                    have.push(endpoint);
                }
                Ok(_) => {}
                Err(e) => warn!(service = %service.name, error = %e, "Skipping unreadable service"),
            }
        }
    }

    Ok(have)
}
