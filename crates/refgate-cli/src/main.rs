use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use refgate_core::dispatch::{self, repo_basename};
use refgate_core::{
    Authorizer, ObjectId, RefgateConfig, Repository, RequestContext, RequestEnv, RouteError,
    Router,
};
use refgate_git::GitRepo;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "refgate",
    about = "refgate: authorization gate and page dispatch for a git browser"
)]
struct Cli {
    /// Path to refgate.toml (default: ~/.config/refgate/refgate.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route the CGI request in the environment and print it as JSON
    Route {
        /// Url of the repository resolved for this request
        #[arg(long)]
        repo_url: Option<String>,

        /// Offer the repository's remote-tracking branches
        #[arg(long)]
        remote_branches: bool,
    },

    /// Run one authorization gate against the CGI request in the environment
    Check {
        #[command(subcommand)]
        target: CheckTarget,
    },

    /// List the registered pages and their capability flags
    Pages,
}

#[derive(Subcommand)]
enum CheckTarget {
    /// May the requester see this repository?
    Repo { repo: String },

    /// May the requester see this reference?
    Ref {
        name: String,

        /// Repository to resolve the reference in
        #[arg(long)]
        git_dir: PathBuf,
    },

    /// May the requester see this commit?
    Commit {
        /// Full hex object id
        id: String,

        /// Repository holding the commit
        #[arg(long)]
        git_dir: PathBuf,

        /// Count remote-tracking branches when checking reachability
        #[arg(long)]
        remote_branches: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout stays clean for CGI output
    fmt()
        .with_env_filter(EnvFilter::from_env("REFGATE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RefgateConfig::load(cli.config.as_deref()).context("failed to load config")?;
    let authorizer =
        Authorizer::new(config.build_filter()).with_commit_policy(config.authz.commit_policy);

    tracing::debug!(
        filter = ?authorizer.filter(),
        commit_policy = ?authorizer.commit_policy(),
        "Loaded configuration"
    );

    let env = RequestEnv::from_process_env();
    let ctx = RequestContext::from_env(env, config.site.clone());

    match cli.command {
        Commands::Route {
            repo_url,
            remote_branches,
        } => {
            let ctx = match repo_url {
                Some(url) => ctx.with_repo(repository(&url, remote_branches)),
                None => ctx,
            };
            route(&authorizer, &ctx).await
        }
        Commands::Check { target } => check(&authorizer, ctx, target).await,
        Commands::Pages => {
            for command in dispatch::commands() {
                println!(
                    "{:<10} repo={:<5} layout={}",
                    command.name, command.wants_repo, command.wants_layout
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn repository(url: &str, enable_remote_branches: bool) -> Repository {
    Repository {
        url: url.to_string(),
        name: repo_basename(url).to_string(),
        enable_remote_branches,
        snapshots: Vec::new(),
    }
}

async fn route(authorizer: &Authorizer, ctx: &RequestContext) -> Result<ExitCode> {
    match Router::new(authorizer).route(ctx).await {
        Ok(route) => {
            println!("{}", serde_json::to_string_pretty(&route)?);
            Ok(ExitCode::SUCCESS)
        }
        // A failed policy program is fatal for the request
        Err(RouteError::Authz(e)) => Err(e).context("authorization failed"),
        Err(e) => {
            tracing::warn!(error = %e, "Request refused");
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn check(
    authorizer: &Authorizer,
    ctx: RequestContext,
    target: CheckTarget,
) -> Result<ExitCode> {
    let authorized = match target {
        CheckTarget::Repo { repo } => authorizer.authorize_repo(&ctx, Some(&repo)).await?,
        CheckTarget::Ref { name, git_dir } => {
            let store = GitRepo::open(&git_dir).await?;
            let ctx = with_git_repo(ctx, &git_dir, false);
            authorizer.authorize_ref(&ctx, &store, &name).await?
        }
        CheckTarget::Commit {
            id,
            git_dir,
            remote_branches,
        } => {
            let commit = ObjectId::from_hex(&id).context("invalid commit id")?;
            let store = GitRepo::open(&git_dir).await?;
            let ctx = with_git_repo(ctx, &git_dir, remote_branches);
            authorizer.authorize_commit(&ctx, &store, &commit).await?
        }
    };

    if authorized {
        println!("authorized");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("denied");
        Ok(ExitCode::FAILURE)
    }
}

/// Resolve the repository from the query (`r=`), falling back to the git dir.
fn with_git_repo(ctx: RequestContext, git_dir: &Path, remote_branches: bool) -> RequestContext {
    let url = ctx
        .query
        .repo
        .clone()
        .unwrap_or_else(|| git_dir.display().to_string());
    ctx.with_repo(repository(&url, remote_branches))
}
