//! Icebox command-line client.

use clap::{Args, Parser, Subcommand};
use icebox_cli::context::{AppContext, load_config};
use icebox_cli::error::{AppError, AppResult};
use icebox_cli::hook::{HookAction, run_hook};
use icebox_cli::presence::{PresenceOutcome, PresenceRequest, check_present};
use icebox_cli::retrieve::{RetrieveOptions, archive_retrieve_many};
use icebox_cli::sync::{SyncOptions, vault_sync};
use icebox_cli::upload::archive_upload;
use icebox_core::Reference;
use icebox_remote::{Job, JobKind, JobStatus, inventory};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PROGRAM_NAME: &str = "icebox";

/// Icebox - a client for asynchronous cold archival storage
#[derive(Parser)]
#[command(name = "icebox")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, env = "ICEBOX_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Vault management commands
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },
    /// Archive commands
    Archive {
        #[command(subcommand)]
        command: ArchiveCommands,
    },
    /// Job commands
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// git-annex hook interface
    AnnexHook(AnnexHookArgs),
}

#[derive(Subcommand)]
enum VaultCommands {
    /// List vaults
    List,
    /// Create a vault
    Create { name: String },
    /// Reconcile the cache against a vault inventory
    Sync {
        name: String,
        /// Block until an inventory job completes
        #[arg(long)]
        wait: bool,
        /// Repair divergence instead of only warning
        #[arg(long)]
        fix: bool,
        /// Accept completed inventories up to this many hours old
        #[arg(long = "max-age", value_name = "HOURS")]
        max_age_hours: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ArchiveCommands {
    /// List archives in a vault
    List {
        vault: String,
        /// Emit id-qualified references for every archive
        #[arg(long)]
        force_ids: bool,
    },
    /// Upload an archive (use `-` to read from stdin)
    Upload {
        vault: String,
        file: String,
        /// Archive name; defaults to the file's basename
        #[arg(long)]
        name: Option<String>,
    },
    /// Retrieve one or more archives
    Retrieve {
        vault: String,
        #[arg(required = true, num_args = 1.., value_name = "NAME")]
        names: Vec<String>,
        /// Fetch outputs larger than this in sequential byte ranges
        #[arg(long, default_value_t = 8 * 1024 * 1024, value_name = "BYTES")]
        multipart_size: u64,
        /// Output file (`-` for stdout); defaults to the archive name
        #[arg(short = 'o', value_name = "OUTPUT_FILENAME")]
        output: Option<String>,
        /// Block until retrieval jobs complete
        #[arg(long)]
        wait: bool,
    },
    /// Delete an archive
    Delete { vault: String, name: String },
    /// Check whether an archive is present upstream
    Checkpresent {
        vault: String,
        name: String,
        /// Block until an inventory job completes
        #[arg(long)]
        wait: bool,
        /// Suppress informational messages on stderr
        #[arg(long)]
        quiet: bool,
        /// Consider confirmations up to this many hours old
        #[arg(long = "max-age", value_name = "HOURS")]
        max_age_hours: Option<u64>,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List jobs across all vaults
    List,
}

#[derive(Args)]
struct AnnexHookArgs {
    vault: String,
    #[arg(value_enum)]
    action: HookAction,
    key: String,
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            let message = match &err {
                AppError::Retryable(message) => message.clone(),
                AppError::Failure(failure) => format!("{failure:#}"),
            };
            for line in message.lines() {
                eprintln!("{PROGRAM_NAME}: {line}");
            }
            err.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> AppResult<()> {
    let config = load_config(cli.config.as_deref())?;
    let ctx = AppContext::build(config).await?;

    match cli.command {
        Commands::Vault { command } => vault_command(&ctx, command).await,
        Commands::Archive { command } => archive_command(&ctx, command).await,
        Commands::Job { command } => job_command(&ctx, command).await,
        Commands::AnnexHook(args) => {
            run_hook(
                &ctx,
                &args.vault,
                args.action,
                &args.key,
                args.file.as_deref(),
            )
            .await
        }
    }
}

async fn vault_command(ctx: &AppContext, command: VaultCommands) -> AppResult<()> {
    match command {
        VaultCommands::List => {
            for vault in ctx.tracker.store().list_vaults().await? {
                println!("{vault}");
            }
            Ok(())
        }
        VaultCommands::Create { name } => {
            ctx.tracker.store().create_vault(&name).await?;
            Ok(())
        }
        VaultCommands::Sync {
            name,
            wait,
            fix,
            max_age_hours,
        } => {
            let opts = SyncOptions {
                max_age_hours: max_age_hours.unwrap_or(ctx.config.sync.sync_max_age_hours),
                fix,
                wait,
            };
            vault_sync(ctx, &name, &opts).await?;
            Ok(())
        }
    }
}

async fn archive_command(ctx: &AppContext, command: ArchiveCommands) -> AppResult<()> {
    match command {
        ArchiveCommands::List { vault, force_ids } => {
            let listing = if force_ids {
                ctx.cache.list_with_ids(&vault).await?
            } else {
                ctx.cache.list_live(&vault).await?
            };
            for reference in listing {
                println!("{reference}");
            }
            Ok(())
        }
        ArchiveCommands::Upload { vault, file, name } => {
            archive_upload(ctx, &vault, &file, name.as_deref()).await?;
            Ok(())
        }
        ArchiveCommands::Retrieve {
            vault,
            names,
            multipart_size,
            output,
            wait,
        } => {
            if names.len() > 1 && output.is_some() {
                return Err(AppError::Failure(anyhow::anyhow!(
                    "cannot specify output filename with multi-archive retrieval"
                )));
            }
            let opts = RetrieveOptions {
                wait,
                multipart_size,
                output,
            };
            archive_retrieve_many(ctx, &vault, &names, &opts).await
        }
        ArchiveCommands::Delete { vault, name } => {
            let reference = Reference::parse(&name);
            let archive_id = ctx
                .cache
                .archive_id(&vault, &reference)
                .await
                .map_err(|_| AppError::Failure(anyhow::anyhow!("archive '{name}' not found")))?;
            ctx.tracker.store().delete_archive(&vault, &archive_id).await?;
            ctx.cache
                .mark_deleted(&vault, &reference, ctx.now())
                .await?;
            Ok(())
        }
        ArchiveCommands::Checkpresent {
            vault,
            name,
            wait,
            quiet,
            max_age_hours,
        } => {
            let outcome = check_present(
                ctx,
                &PresenceRequest {
                    vault: &vault,
                    raw: &name,
                    max_age_hours: Some(
                        max_age_hours.unwrap_or(ctx.config.sync.checkpresent_max_age_hours),
                    ),
                    wait,
                },
            )
            .await?;
            match outcome {
                PresenceOutcome::Present { reference } => {
                    println!("{reference}");
                    Ok(())
                }
                PresenceOutcome::NotFound { after_sync } => {
                    if !quiet {
                        if after_sync {
                            eprintln!(
                                "archive '{name}' not found, but it may not be in the \
                                 inventory yet"
                            );
                        } else {
                            eprintln!("archive '{name}' not found");
                        }
                    }
                    Ok(())
                }
                PresenceOutcome::NotConfirmedRecently => {
                    if !quiet {
                        eprintln!(
                            "archive '{name}' found, but has not been seen recently enough \
                             to consider it present"
                        );
                    }
                    Ok(())
                }
                PresenceOutcome::Retryable(message) => Err(AppError::Retryable(message)),
            }
        }
    }
}

async fn job_command(ctx: &AppContext, command: JobCommands) -> AppResult<()> {
    match command {
        JobCommands::List => {
            for vault in ctx.tracker.store().list_vaults().await? {
                for job in ctx.tracker.store().list_jobs(&vault).await? {
                    println!("{}", job_oneline(ctx, &job).await);
                }
            }
            Ok(())
        }
    }
}

/// One-line job summary: `<action>/<status> <date> <vault> <name>` with
/// `a`rchive/`i`nventory actions and `p`ending, `d`one, `e`rror statuses.
async fn job_oneline(ctx: &AppContext, job: &Job) -> String {
    let action_letter = match &job.kind {
        JobKind::Retrieval { .. } => 'a',
        JobKind::Inventory => 'i',
    };
    let status_letter = match job.status {
        JobStatus::InProgress => 'p',
        JobStatus::Succeeded => 'd',
        JobStatus::Failed => 'e',
    };
    let date = inventory::format_timestamp(job.completion_date.unwrap_or(job.creation_date))
        .unwrap_or_else(|_| "-".to_string());

    let name = match &job.kind {
        JobKind::Inventory => String::new(),
        JobKind::Retrieval { archive_id } => ctx
            .cache
            .archive_name(&job.vault, &Reference::ById(archive_id.clone()))
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| format!("id:{archive_id}")),
    };

    format!(
        "{action_letter}/{status_letter} {date} {vault:<10} {name}",
        vault = job.vault
    )
}
