//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use tracing::info;

use graybox_core::scheduler::{Scheduler, Stage, WorkerInvoker};
use graybox_shared::{
    AppConfig, ProjectDocument, PromoteParams, init_config, load_config,
};
use graybox_store::{FileStore, layout, records};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Graybox promote — move staged content trees back to production.
#[derive(Parser)]
#[command(
    name = "graybox",
    version,
    about = "Trigger and inspect graybox content promotion projects.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// State store root (defaults to the configured store_root).
    #[arg(long, global = true)]
    pub store_root: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// The trigger-parameter bag as CLI flags.
#[derive(Args, Clone)]
pub(crate) struct ParamArgs {
    /// Production content tree root folder.
    #[arg(long)]
    root_folder: String,

    /// Graybox (staging) content tree root folder.
    #[arg(long)]
    gb_root_folder: String,

    /// Experience name marking the staging variant.
    #[arg(long)]
    experience_name: String,

    /// Path to the project status workbook.
    #[arg(long)]
    project_excel_path: String,

    /// Authoring origin serving rendered markdown.
    #[arg(long)]
    staging_origin: String,

    /// Admin API key env var is read separately; see config.
    #[arg(long, env = "GRAYBOX_ADMIN_API_KEY", hide_env_values = true)]
    admin_api_key: Option<String>,

    /// Restrict promotion to the drafts subtree.
    #[arg(long)]
    drafts_only: bool,

    /// Path patterns excluded from promotion (repeatable).
    #[arg(long = "ignore")]
    promote_ignore_paths: Vec<String>,
}

impl From<ParamArgs> for PromoteParams {
    fn from(args: ParamArgs) -> Self {
        PromoteParams {
            root_folder: args.root_folder,
            gb_root_folder: args.gb_root_folder,
            experience_name: args.experience_name,
            project_excel_path: args.project_excel_path,
            staging_origin: args.staging_origin,
            admin_api_key: args.admin_api_key,
            drafts_only: args.drafts_only,
            promote_ignore_paths: args.promote_ignore_paths,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Validate a trigger-parameter bag and print the frozen params.
    Validate {
        #[command(flatten)]
        params: ParamArgs,
    },

    /// List all projects in the promotion queue.
    Queue,

    /// Show one project's status, batch map, and error records.
    Status {
        /// Project path (<gbRootFolder>/<experienceName>).
        #[arg(long)]
        project: String,
    },

    /// Scan the queue once and print what the scheduler would dispatch.
    /// Workers themselves run on the hosting platform.
    Tick,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "graybox=info",
        1 => "graybox=debug",
        _ => "graybox=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    let state = open_state(&cli, &config);

    match cli.command {
        Command::Validate { params } => {
            let params: PromoteParams = params.into();
            params.validate().map_err(|e| eyre!(e.to_string()))?;
            println!("parameters valid for project {}", params.project_path());
            println!("{}", serde_json::to_string_pretty(&params)?);
            Ok(())
        }

        Command::Queue => {
            let queue = records::read_queue(&state).await;
            if queue.is_empty() {
                println!("project queue is empty");
                return Ok(());
            }
            for entry in queue {
                println!(
                    "{}  {}  (created {})",
                    entry.project_path, entry.status, entry.created_time
                );
            }
            Ok(())
        }

        Command::Status { project } => {
            let doc: ProjectDocument = state
                .read(&layout::project_status(&project))
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            println!("project:  {project}");
            println!("status:   {}", doc.status);
            println!("created:  {}", doc.created_time);

            let batches = records::read_batch_status(&state, &project)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            println!("batches:  {}", batches.value.len());
            for (name, status) in &batches.value {
                let priority = graybox_core::batch_priority(name);
                println!("  {name}: {status} ({priority:?} priority)");
            }

            let promote_errors: Vec<graybox_shared::FailureRecord> = state
                .read_array_or_default(&layout::promote_errors(&project))
                .await;
            let copy_errors: Vec<graybox_shared::FailureRecord> = state
                .read_array_or_default(&layout::copy_errors(&project))
                .await;
            println!(
                "errors:   {} promote, {} copy",
                promote_errors.len(),
                copy_errors.len()
            );
            for record in promote_errors.iter().chain(copy_errors.iter()) {
                println!("  {}: {}", record.path, record.error);
            }

            if !doc.statuses.is_empty() {
                println!("log:");
                for entry in &doc.statuses {
                    let when = entry
                        .timestamp
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default();
                    println!("  [{when}] {}", entry.step);
                }
            }
            Ok(())
        }

        Command::Tick => {
            let invoker = Arc::new(PrintingInvoker);
            let scheduler = Scheduler::new(state, invoker);
            let dispatched = scheduler
                .tick()
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            println!("{} invocation(s) pending", dispatched.len());
            Ok(())
        }

        Command::Config { action } => match action {
            ConfigAction::Init => {
                let path = init_config()?;
                println!("created {}", path.display());
                Ok(())
            }
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        },
    }
}

fn open_state(cli: &Cli, config: &AppConfig) -> FileStore {
    let root = cli
        .store_root
        .clone()
        .unwrap_or_else(|| config.defaults.store_root.clone());
    info!(root, "opening state store");
    FileStore::new(root)
}

/// Prints planned invocations instead of running workers — the CLI has no
/// destination transports; those live on the hosting platform.
struct PrintingInvoker;

#[async_trait::async_trait]
impl WorkerInvoker for PrintingInvoker {
    async fn invoke(
        &self,
        stage: Stage,
        project: &str,
        batch_name: Option<&str>,
        _params: &PromoteParams,
    ) -> graybox_shared::Result<()> {
        println!(
            "would invoke {stage} for {project} (batch: {})",
            batch_name.unwrap_or("-")
        );
        Ok(())
    }
}
