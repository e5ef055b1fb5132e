//! caseflow CLI entry point
//!
//! ```text
//! caseflow run case.yml [--only a,b] [--not c] [--context k=v] [--serve]
//! caseflow server [--port N] [--start]
//! caseflow queue list | start | stop | put case.yml 20 | abort [JID] | del JID | reprio JID PRIO
//! ```

use anyhow::{Context as _, Result};
use caseflow::config::{Configuration, GENERAL_SECTION};
use caseflow::core::{Context, Engine, RunOutcome, TaskRegistry};
use caseflow::document::{norm_path, CaseDocument};
use caseflow::error::ABORTED_EXIT_CODE;
use caseflow::queue::{JobId, JobQueue, JobState, QueueSettings};
use caseflow::rpc::{master, MasterClient, WorkerServer};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "caseflow", version, about = "Run case pipelines and queue them for execution")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline of a case document
    Run(RunArgs),
    /// Run the queue master
    Server(ServerArgs),
    /// Talk to a running queue master
    Queue(QueueArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Case document
    case: PathBuf,

    /// Only run these task kinds
    #[arg(short, long, value_delimiter = ',')]
    only: Vec<String>,

    /// Do not run these task kinds
    #[arg(short = 'n', long = "not", value_delimiter = ',')]
    not: Vec<String>,

    /// Context values that override everything else, `key=value,...`
    #[arg(short, long)]
    context: Option<String>,

    /// Configuration overrides, `section.key=value,...`
    #[arg(long)]
    config: Option<String>,

    /// Wait for a `run` call on the control server instead of running right away
    #[arg(long)]
    serve: bool,

    /// With --serve, start the pipeline without waiting for `run`
    #[arg(long, requires = "serve")]
    auto_run: bool,

    /// Control server port, default `general.worker_port`
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args)]
struct ServerArgs {
    /// Configuration overrides, `section.key=value,...`
    #[arg(long)]
    config: Option<String>,

    /// Port, default `general.server_port`
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between queue polls, default `general.poll_interval`
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Start the queue right away
    #[arg(long)]
    start: bool,
}

#[derive(Args)]
struct QueueArgs {
    /// Master port, default `general.server_port`
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    action: QueueAction,
}

#[derive(Subcommand)]
enum QueueAction {
    /// List queued jobs
    List,
    /// Start the queue
    Start,
    /// Stop the queue, a running job is not affected
    Stop,
    /// Abort a job, by default the running one
    Abort {
        jid: Option<JobId>,
        /// Kill the worker process instead of asking it to stop
        #[arg(long)]
        force: bool,
    },
    /// Put a case document in the queue
    Put {
        case: PathBuf,
        #[arg(default_value_t = 10)]
        prio: i64,
    },
    /// Remove a job from the queue
    #[command(name = "del")]
    Delete { jid: JobId },
    /// Change the priority of a job
    Reprio { jid: JobId, prio: i64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Server(args) => server(args).await,
        Commands::Queue(args) => queue(args).await,
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let doc = CaseDocument::from_file(&args.case)?;
    let config = Configuration::load(Some(&doc), args.config.as_deref())?;

    let mut registry = TaskRegistry::with_builtin();
    registry.apply_filters(&args.only, &args.not);

    std::env::set_current_dir(doc.directory())
        .with_context(|| format!("cannot change to {}", doc.directory().display()))?;
    let mut context = Context::from_pairs([
        ("config_file", doc.path.display().to_string()),
        ("case_root", doc.directory().display().to_string()),
    ]);
    if let Some(assignments) = args.context.as_deref() {
        context = context.with_overrides(Context::parse_assignments(assignments));
    }

    let root = doc.task_tree(&config);
    log::info!("Running {} ({} top-level tasks)", doc.path.display(), root.children.len());
    let engine = Arc::new(Engine::new(registry, config));

    if args.serve {
        let port = match args.port {
            Some(port) => port,
            None => u16::try_from(engine.config.getint(GENERAL_SECTION, "worker_port")?)
                .context("general.worker_port out of range")?,
        };
        let server = WorkerServer::new(engine, root, context);
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("cannot listen on port {}", port))?;

        let interrupted = Arc::clone(&server);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted");
                interrupted.interrupt();
            }
        });

        let outcome = server.serve(listener, args.auto_run).await?;
        let code = outcome.map(|o| o.exit_code()).unwrap_or(ABORTED_EXIT_CODE);
        return Ok(exit_code(code));
    }

    let control = Arc::clone(&engine.control);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted");
            control.abort();
        }
    });

    let result = tokio::task::spawn_blocking(move || engine.run(&root, context)).await?;
    let outcome = RunOutcome::from_result(&result);
    match &outcome {
        RunOutcome::Finished => log::info!("Run finished"),
        other => log::error!("Run {}", other),
    }
    Ok(exit_code(outcome.exit_code()))
}

async fn server(args: ServerArgs) -> Result<ExitCode> {
    let config = Configuration::load(None, args.config.as_deref())?;
    let mut settings = QueueSettings::from_config(&config)?;
    if let Some(secs) = args.poll_interval.filter(|s| s.is_finite() && *s > 0.0) {
        settings.poll_interval = Duration::from_secs_f64(secs);
    }
    let port = master_port(&config, args.port)?;

    let queue = Arc::new(JobQueue::new(settings));
    if args.start {
        queue.start();
    }

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("cannot listen on port {}", port))?;
    master::serve(Arc::clone(&queue), listener, async {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("Shutting down master");
    })
    .await?;

    queue.stop();
    Ok(ExitCode::SUCCESS)
}

fn master_port(config: &Configuration, port: Option<u16>) -> Result<u16> {
    match port {
        Some(port) => Ok(port),
        None => Ok(u16::try_from(config.getint(GENERAL_SECTION, "server_port")?)
            .context("general.server_port out of range")?),
    }
}

async fn queue(args: QueueArgs) -> Result<ExitCode> {
    let config = Configuration::load(None, None)?;
    let client = MasterClient::new(master_port(&config, args.port)?);

    match args.action {
        QueueAction::List => {
            let state = client.queue_state().await?;
            let jobs = client.get_queue().await?;
            println!("Queue State: {}", state);
            println!("Queue Size:  {}", jobs.len());
            println!();
            println!("{:<8}{:<60}{:<10}{}", "Job ID", "Configuration File", "Priority", "State");
            println!("{}", "-".repeat(87));
            for job in jobs {
                println!("{:<8}{:<60}{:<10}{}", job.jid, job.config, job.prio, job.state);
                if job.state == JobState::Running {
                    let info: Vec<String> = job
                        .worker_info
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect();
                    println!(
                        "        Active Worker: {:<44} Worker Information: {}",
                        job.active_worker,
                        info.join(", ")
                    );
                    println!();
                }
            }
            println!();
        }
        QueueAction::Start => {
            println!("Starting queue.");
            if !client.start_queue().await? {
                println!("Queue was already running.");
            }
        }
        QueueAction::Stop => {
            println!("Stopping queue.");
            client.stop_queue().await?;
        }
        QueueAction::Abort { jid, force } => {
            let jid = match jid {
                Some(jid) => Some(jid),
                None => client
                    .get_queue()
                    .await?
                    .into_iter()
                    .find(|job| job.state == JobState::Running)
                    .map(|job| job.jid),
            };
            match jid {
                Some(jid) => {
                    client.abort(jid, force).await?;
                    println!("Job {} aborted", jid);
                }
                None => {
                    println!("Can't abort, no running jobs.");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        QueueAction::Put { case, prio } => {
            let case = norm_path(&case);
            println!(
                "Put case with config {}, priority {} in the queue.",
                case.display(),
                prio
            );
            let jid = client.enqueue(prio, &case.display().to_string()).await?;
            println!("Queued job with ID {}", jid);
        }
        QueueAction::Delete { jid } => {
            println!("Delete {}", jid);
            println!("{}", client.delete(jid).await?);
        }
        QueueAction::Reprio { jid, prio } => {
            println!("Repriorize job {} {}", jid, prio);
            println!("{}", client.reprio(jid, prio).await?);
        }
    }
    Ok(ExitCode::SUCCESS)
}
