use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use clap::{Parser, Subcommand};
use resilience::presets;
use s3_utils::S3Client;
use site_deploy_service::config::{DeployConfig, TrustConfig};
use site_deploy_service::rewrite::RequestRewriter;
use site_deploy_service::services::{
    CloudFrontEdgeCache, DeployInvalidator, DeployOptions, IdentityToken, InvalidationPlanner,
    S3StorageTarget, StsCredentialIssuer, TrustBroker, TrustClaim,
};
use site_deploy_service::snapshot::AssetSnapshot;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "site-deploy")]
#[command(about = "Publish a static site and invalidate its edge cache", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload the built site, prune stale objects and invalidate the edge
    Publish {
        /// Directory holding the built site (overrides SITE_DEPLOY_SOURCE_DIR)
        #[arg(long)]
        source_dir: Option<PathBuf>,
    },

    /// Print the viewer-request edge function for the configured site
    RenderEdgeFunction {
        /// Optional site rules JSON
        #[arg(long)]
        site_config: Option<PathBuf>,
    },

    /// Exchange a CI identity token for short-lived deploy credentials
    MintCredentials {
        /// File holding the OIDC token
        #[arg(long, env = "SITE_DEPLOY_TRUST_TOKEN_FILE")]
        token_file: PathBuf,

        /// Requested lifetime in seconds, capped at one hour
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Args::parse().command {
        Commands::Publish { source_dir } => publish(source_dir).await,
        Commands::RenderEdgeFunction { site_config } => render_edge_function(site_config),
        Commands::MintCredentials {
            token_file,
            duration_secs,
        } => mint_credentials(token_file, duration_secs.map(Duration::from_secs)).await,
    }
}

async fn publish(source_dir: Option<PathBuf>) -> Result<()> {
    let mut config = DeployConfig::from_env().context("Failed to load deploy configuration")?;
    if let Some(dir) = source_dir {
        config.source_dir = dir;
    }
    let site = Arc::new(config.load_site_config()?);

    tracing::info!(
        bucket = %config.bucket,
        distribution_id = %config.distribution_id,
        source_dir = %config.source_dir.display(),
        "Starting site-deploy publish"
    );

    let s3 = S3Client::with_config(config.s3_config()).await;
    let storage = Arc::new(S3StorageTarget::new(s3.operations()));

    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;
    let edge = Arc::new(CloudFrontEdgeCache::new(
        aws_sdk_cloudfront::Client::new(&aws_config),
        config.distribution_id.clone(),
    ));

    let dir = config.source_dir.clone();
    let root_document = site.root_document.clone();
    let manifest_key = config.manifest_key.clone();
    let snapshot = tokio::task::spawn_blocking(move || {
        AssetSnapshot::from_dir(&dir, &root_document, &[manifest_key.as_str()])
    })
    .await
    .context("Snapshot task panicked")??;

    let deployer = DeployInvalidator::new(
        storage,
        edge,
        InvalidationPlanner::new(site, config.max_invalidation_paths),
        DeployOptions::from_config(&config),
    );

    let report = deployer.publish(&snapshot).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn render_edge_function(site_config: Option<PathBuf>) -> Result<()> {
    let site = match site_config {
        Some(path) => site_deploy_service::SiteConfig::from_json_file(&path)?,
        None => site_deploy_service::SiteConfig::default(),
    };

    print!("{}", RequestRewriter::new(Arc::new(site)).edge_function_source());
    Ok(())
}

async fn mint_credentials(token_file: PathBuf, requested: Option<Duration>) -> Result<()> {
    let config = TrustConfig::from_env().context("Failed to load trust configuration")?;

    let raw = std::fs::read_to_string(&token_file)
        .with_context(|| format!("Cannot read token file {}", token_file.display()))?;
    let token = IdentityToken::from_jwt(raw.trim())?;

    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .no_credentials()
        .load()
        .await;
    let issuer = StsCredentialIssuer::new(
        aws_sdk_sts::Client::new(&aws_config),
        config.role_arn.clone(),
    );

    let broker = TrustBroker::new(
        TrustClaim::new(config.audience.clone(), config.subjects.iter().cloned()),
        issuer,
        presets::credential_exchange_config(),
    );

    let credentials = broker.mint_credentials(&token, requested).await?;
    println!("{}", serde_json::to_string_pretty(&credentials)?);

    Ok(())
}
