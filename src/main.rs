use anyhow::Context;
use clap::{ArgGroup, Parser};
use relsync::{PlannedAction, ReleaseSyncer, RepoSlug, SyncConfig, Token};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relsync")]
#[command(about = "Mirror a GitHub release and its assets to another repository", long_about = None)]
#[command(version)]
#[command(group(ArgGroup::new("release").required(true).args(["tag", "latest"])))]
struct Args {
    /// Specific release tag to sync
    #[arg(long)]
    tag: Option<String>,

    /// Sync the latest release
    #[arg(long)]
    latest: bool,

    /// Repository to read the release from (owner/name)
    #[arg(long, alias = "private-repo")]
    source_repo: String,

    /// Repository to publish the release to (owner/name)
    #[arg(long, alias = "public-repo")]
    dest_repo: String,

    /// GitHub token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Delete and recreate the release if it already exists in the destination
    #[arg(long)]
    force: bool,

    /// Show what would be done without making changes
    #[arg(long)]
    dry_run: bool,

    /// Temporary download directory
    #[arg(long, default_value = "temp_assets")]
    staging_dir: PathBuf,

    /// GitHub API base URL
    #[arg(long, default_value = "https://api.github.com")]
    api_url: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn build_config(args: &Args) -> anyhow::Result<SyncConfig> {
    let token = Token::new(args.token.clone().unwrap_or_default())?;
    let source = RepoSlug::parse(&args.source_repo).context("invalid --source-repo")?;
    let destination = RepoSlug::parse(&args.dest_repo).context("invalid --dest-repo")?;

    let mut config = SyncConfig::new(source, destination, token);
    config.staging_dir = args.staging_dir.clone();
    config.api_base_url = args.api_url.clone();
    Ok(config)
}

async fn run(args: &Args, config: &SyncConfig) -> anyhow::Result<()> {
    let syncer = ReleaseSyncer::new(config)?;
    let tag = if args.latest { None } else { args.tag.as_deref() };

    if args.dry_run {
        let report = syncer
            .plan(tag, args.force)
            .await
            .context("dry run failed")?;
        if report.action == PlannedAction::Conflict {
            info!("Re-run with --force to overwrite {}", report.tag);
        }
        return Ok(());
    }

    let url = syncer.sync(tag, args.force).await.context("sync failed")?;
    println!("\n🎉 Success! Release synced to: {}", url);
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relsync={}", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    if args.dry_run {
        info!("🔍 DRY RUN MODE - No changes will be made");
    }

    // Dropping the sync future on Ctrl-C removes the staging directory.
    let outcome = tokio::select! {
        result = run(&args, &config) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
        None => {
            info!("⏹️ Sync cancelled by user");
            std::process::exit(1);
        }
    }
}
