use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::collections::HashMap;
use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use pane_notifier::agent::center::{NotificationCenter, NotifySendCenter};
use pane_notifier::agent::client::launch_agent;
use pane_notifier::agent::launch::{CommandSoundPlayer, ProcessLauncher};
use pane_notifier::agent::{
    self, ensure_running, transport, ActionStore, AgentClient, AgentRuntime, Dispatcher,
    NotifyAction, NotifyRequest,
};
use pane_notifier::binary::ensure_binary;
use pane_notifier::config::Config;
use pane_notifier::hooks::{self, Agent, DetailOverrides, HookContext, HookEnv};
use pane_notifier::logging::{self, AGENT_LOG, CLI_LOG};
use pane_notifier::multiplexer::{Multiplexer, TmuxMultiplexer};
use pane_notifier::payload::{self, FocusCommandOptions, FocusPayload};
use pane_notifier::terminal::{activate_terminal, resolve_terminal_profile, ResolveInput};

/// Pane Notifier - desktop notifications that jump back to the tmux pane
#[derive(Parser)]
#[command(name = "pane-notifier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a notification for the current tmux pane
    Notify(NotifyArgs),
    /// Return to the pane encoded in a focus payload (run on click)
    Focus(FocusArgs),
    /// Send a raw notify request to the agent
    Send(SendArgs),
    /// Manage the notification agent
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Print environment diagnostics as JSON
    Doctor,
}

#[derive(Args)]
struct NotifyArgs {
    /// Notification title
    #[arg(long)]
    title: Option<String>,
    /// Notification body
    #[arg(long)]
    message: Option<String>,
    /// Terminal key, alias or bundle id
    #[arg(long, env = "PANE_NOTIFIER_TERMINAL")]
    terminal: Option<String>,
    /// Terminal bundle id, overriding detection
    #[arg(long)]
    term_bundle_id: Option<String>,
    /// Sound name or path ("none" for silence)
    #[arg(long)]
    sound: Option<String>,
    /// Explicit tmux binary
    #[arg(long)]
    tmux_bin: Option<PathBuf>,
    /// Pane to describe instead of the current one
    #[arg(long, env = "TMUX_PANE")]
    target_pane: Option<String>,
    /// Parse a Codex notify payload
    #[arg(long, conflicts_with = "claude")]
    codex: bool,
    /// Skip notifications for Codex subagent turns
    #[arg(long)]
    skip_codex_subagent: bool,
    /// Parse a Claude Code hook payload from stdin
    #[arg(long)]
    claude: bool,
    /// Print what would be sent without notifying
    #[arg(long)]
    dry_run: bool,
    /// Print diagnostics to stderr
    #[arg(short, long)]
    verbose: bool,
    /// Append diagnostic JSON lines to this file
    #[arg(long, env = "PANE_NOTIFIER_LOG_FILE")]
    log_file: Option<PathBuf>,
    /// Codex payload JSON (Codex passes it as the last argument)
    payload: Option<String>,
}

#[derive(Args)]
struct FocusArgs {
    /// Encoded focus payload
    #[arg(long)]
    payload: String,
    #[arg(short, long)]
    verbose: bool,
    #[arg(long, env = "PANE_NOTIFIER_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Args)]
struct SendArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    message: String,
    #[arg(long)]
    sound: Option<String>,
    /// Absolute path run when the notification is clicked
    #[arg(long)]
    action_exec: String,
    /// Argument for the click action (repeatable)
    #[arg(long = "action-arg", allow_hyphen_values = true)]
    action_args: Vec<String>,
    /// Request id (random when omitted)
    #[arg(long)]
    request_id: Option<String>,
}

#[derive(Subcommand)]
enum AgentAction {
    /// Run the agent in the foreground
    Run,
    /// Start the agent in the background if it is not running
    Start,
    /// Report whether the agent is reachable
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());

    // ログ初期化
    let log_file = match &cli.command {
        Commands::Agent {
            action: AgentAction::Run,
        } => AGENT_LOG,
        _ => CLI_LOG,
    };
    if let Err(e) = logging::init_logging(&agent::logs_dir(), log_file, &level) {
        eprintln!("Warning: {:#}", e);
    }

    match cli.command {
        Commands::Notify(args) => run_notify(&config, args),
        Commands::Focus(args) => run_focus(args),
        Commands::Send(args) => run_send(&config, args),
        Commands::Agent { action } => match action {
            AgentAction::Run => run_agent(&config),
            AgentAction::Start => start_agent(&config),
            AgentAction::Status => agent_status(&config),
        },
        Commands::Doctor => run_doctor(&config),
    }
}

/// Append one `{timestamp, detail}` line; failures never affect the command
fn append_diagnostic(log_file: Option<&Path>, detail: &serde_json::Value) {
    let Some(path) = log_file else {
        return;
    };
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let entry = json!({
            "timestamp": agent::format_timestamp(chrono::Utc::now()),
            "detail": detail,
        });
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", entry)
    })();
    if let Err(e) = result {
        debug!("Failed to append diagnostic log {}: {}", path.display(), e);
    }
}

fn log_verbose(verbose: bool, log_file: Option<&Path>, detail: serde_json::Value) {
    if verbose {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&detail).unwrap_or_else(|_| detail.to_string())
        );
    }
    append_diagnostic(log_file, &detail);
}

fn read_stdin() -> Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }
    let mut input = String::new();
    stdin
        .lock()
        .read_to_string(&mut input)
        .context("Failed to read stdin")?;
    Ok(input.trim().to_string())
}

fn load_hook_context(args: &NotifyArgs, env: &HookEnv) -> Result<Option<HookContext>> {
    if args.claude {
        return hooks::load_claude(&read_stdin()?, env);
    }
    if !args.codex {
        return Ok(None);
    }

    // 引数 > 環境変数 > 標準入力
    let payload = match args.payload.as_ref().filter(|p| !p.trim().is_empty()) {
        Some(p) => p.clone(),
        None => match std::env::var("CODEX_NOTIFICATION_PAYLOAD")
            .ok()
            .filter(|p| !p.trim().is_empty())
        {
            Some(p) => p,
            None => read_stdin()?,
        },
    };
    hooks::load_codex(&payload, env)
}

fn run_notify(config: &Config, args: NotifyArgs) -> Result<()> {
    let log_file = args.log_file.as_deref();
    let hook_env = HookEnv::from_process(config.sound.default.clone());
    let context = load_hook_context(&args, &hook_env)?;

    if args.codex
        && args.skip_codex_subagent
        && context.as_ref().and_then(|c| c.is_subagent) == Some(true)
    {
        info!("Skipping notification for Codex subagent turn");
        log_verbose(
            args.verbose,
            log_file,
            json!({ "stage": "notify", "skipped": true, "reason": "codex-subagent", "context": context }),
        );
        return Ok(());
    }

    let tmux_bin = ensure_binary("tmux", args.tmux_bin.as_deref())?;
    let tmux = TmuxMultiplexer::new(tmux_bin).query_context(args.target_pane.as_deref())?;

    let env: HashMap<String, String> = std::env::vars().collect();
    let explicit_key = args
        .terminal
        .as_deref()
        .or(config.terminal.default.as_deref());
    let terminal = resolve_terminal_profile(&ResolveInput {
        explicit_key,
        bundle_override: args.term_bundle_id.as_deref(),
        env: Some(&env),
    });

    let agent_title = if args.codex {
        Some(Agent::Codex.default_title(&hook_env.repository))
    } else if args.claude {
        Some(Agent::Claude.default_title(&hook_env.repository))
    } else {
        None
    };
    let overrides = DetailOverrides {
        title: args.title.clone(),
        message: args.message.clone(),
        sound: args.sound.clone(),
    };
    let mut details = hooks::resolve_details(&tmux, &overrides, context.as_ref(), agent_title);
    if details.sound.is_none() {
        details.sound = Some(config.sound.default.clone());
    }

    let focus_payload = FocusPayload { tmux, terminal };
    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    let focus = payload::build_focus_command(
        &focus_payload,
        &exe,
        &FocusCommandOptions {
            verbose: args.verbose,
            log_file: args.log_file.as_ref().map(|p| p.to_string_lossy().to_string()),
        },
    )
    .context("Failed to build focus command")?;

    if args.dry_run {
        let summary = json!({
            "tmux": focus_payload.tmux,
            "terminal": focus_payload.terminal,
            "notification": details,
            "focus": {
                "payload": focus_payload,
                "command": focus.to_shell(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        append_diagnostic(log_file, &json!({ "stage": "dry-run", "data": summary }));
        return Ok(());
    }

    log_verbose(
        args.verbose,
        log_file,
        json!({
            "stage": "notify",
            "tmux": focus_payload.tmux,
            "terminal": focus_payload.terminal,
            "notification": details,
            "focusCommand": focus,
            "context": context,
        }),
    );

    let request = NotifyRequest::new(
        uuid::Uuid::new_v4().to_string(),
        details.title,
        details.message,
        details.sound,
        NotifyAction {
            executable: focus.executable,
            arguments: focus.args,
        },
    );
    deliver(config, &request)
}

fn deliver(config: &Config, request: &NotifyRequest) -> Result<()> {
    let socket_path = config.agent.socket_path();
    ensure_running(&socket_path, &config.agent.bootstrap(), || launch_agent(&[]))?;

    let response = AgentClient::new(&socket_path).notify(request)?;
    info!(
        request_id = %request.request_id,
        queued_at = response.queued_at.as_deref().unwrap_or(""),
        "Notification delivered"
    );
    Ok(())
}

fn run_focus(args: FocusArgs) -> Result<()> {
    let focus_payload = payload::decode(&args.payload).context("Invalid focus payload")?;
    log_verbose(
        args.verbose,
        args.log_file.as_deref(),
        json!({ "stage": "focus", "payload": focus_payload }),
    );

    // payload に記録された tmux バイナリで再生する
    let tmux = TmuxMultiplexer::new(&focus_payload.tmux.tmux_bin);
    tmux.focus(&focus_payload.tmux)?;

    if cfg!(target_os = "macos") {
        activate_terminal(&focus_payload.terminal.bundle_id)?;
    } else {
        debug!(
            "Skipping terminal activation for {}",
            focus_payload.terminal.bundle_id
        );
    }
    Ok(())
}

fn run_send(config: &Config, args: SendArgs) -> Result<()> {
    let request = NotifyRequest::new(
        args.request_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        args.title,
        args.message,
        args.sound,
        NotifyAction {
            executable: args.action_exec,
            arguments: args.action_args,
        },
    );
    deliver(config, &request)?;
    println!("{}", json!({ "ok": true, "request_id": request.request_id }));
    Ok(())
}

fn run_agent(config: &Config) -> Result<()> {
    let socket_path = config.agent.socket_path();
    if transport::is_reachable(&socket_path) {
        bail!("Agent already running at {}", socket_path.display());
    }

    let store = ActionStore::new(config.agent.actions_path()).with_retention(config.agent.retention());
    let (responses_tx, responses_rx) = tokio::sync::mpsc::unbounded_channel();
    let center = NotifySendCenter::detect(responses_tx);
    let sounds = CommandSoundPlayer::new(
        config.sound.player.clone(),
        config.sound.directory.clone(),
        config.sound.extension.clone(),
    );
    let dispatcher = Dispatcher::new(
        Arc::new(store),
        Arc::new(center),
        Arc::new(ProcessLauncher),
        Arc::new(sounds),
    );
    let runtime = AgentRuntime::new(&socket_path, dispatcher);

    info!("Pane notifier agent starting");
    let tokio_runtime = tokio::runtime::Runtime::new()?;
    let result = tokio_runtime.block_on(async {
        tokio::select! {
            result = runtime.run(responses_rx) => result.map_err(anyhow::Error::from),
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Shutdown requested");
                Ok(())
            }
        }
    });

    // 他のエージェントが待ち受け中のソケットは消さない
    let owns_socket = !matches!(
        result
            .as_ref()
            .err()
            .and_then(|e| e.downcast_ref::<transport::TransportError>()),
        Some(transport::TransportError::AlreadyListening(_))
    );
    if owns_socket {
        if let Err(e) = std::fs::remove_file(&socket_path) {
            warn!("Failed to remove socket {}: {}", socket_path.display(), e);
        }
    }
    result
}

fn start_agent(config: &Config) -> Result<()> {
    let socket_path = config.agent.socket_path();
    let started = ensure_running(&socket_path, &config.agent.bootstrap(), || launch_agent(&[]))?;
    println!(
        "{}",
        json!({ "running": true, "started": started, "socket_path": socket_path })
    );
    Ok(())
}

fn agent_status(config: &Config) -> Result<()> {
    let socket_path = config.agent.socket_path();
    let running = transport::is_reachable(&socket_path);
    println!(
        "{}",
        json!({ "running": running, "socket_path": socket_path })
    );
    Ok(())
}

fn run_doctor(config: &Config) -> Result<()> {
    let socket_path = config.agent.socket_path();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let center = NotifySendCenter::detect(tx);
    let tmux = ensure_binary("tmux", None);
    let notifier = ensure_binary("notify-send", None);

    let report = json!({
        "config": Config::config_path().ok(),
        "socket_path": socket_path,
        "actions_path": config.agent.actions_path(),
        "logs_dir": agent::logs_dir(),
        "agent_running": transport::is_reachable(&socket_path),
        "authorization": center.authorization_status().label(),
        "binaries": {
            "tmux": tmux.as_ref().ok(),
            "notify-send": notifier.as_ref().ok(),
            "sound_player": config.sound.player,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
