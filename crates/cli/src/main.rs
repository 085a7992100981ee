//! toolhub CLI
//!
//! Terminal front end for the toolhub dashboard API: streams live
//! notifications and exposes the common tool and admin calls.

mod logging;
mod render;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use toolhub_client::{ApiClient, ClientConfig, ConnectionState, StoreEvent, Toolhub};
use toolhub_protocol::client::{PageQuery, ToolInput, ToolQuery};
use toolhub_protocol::InputFieldKind;

#[derive(Parser)]
#[command(name = "toolhub", version, about = "Live notifications and AI tools from the terminal")]
struct Cli {
    /// REST API base URL
    #[arg(long, env = "TOOLHUB_API_URL", global = true)]
    api_url: Option<String>,

    /// Notification channel URL
    #[arg(long, env = "TOOLHUB_WS_URL", global = true)]
    ws_url: Option<String>,

    #[command(flatten)]
    auth: AuthArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct AuthArgs {
    /// Bearer token from a previous login
    #[arg(long, env = "TOOLHUB_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "TOOLHUB_EMAIL", global = true)]
    email: Option<String>,

    #[arg(long, env = "TOOLHUB_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Stream live notifications until Ctrl-C
    Watch,
    /// Show the logged-in account
    Whoami,
    #[command(subcommand)]
    Tools(ToolsCommand),
    #[command(subcommand)]
    Admin(AdminCommand),
    /// Stored notifications
    #[command(subcommand)]
    Inbox(InboxCommand),
}

#[derive(Subcommand)]
enum ToolsCommand {
    /// List tools
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
        /// Only tools created by the current user
        #[arg(long)]
        mine: bool,
    },
    /// Show a tool and its inputs
    Show { id: String },
    /// Run a tool with `--input name=value` pairs
    Run {
        id: String,
        #[arg(short, long = "input", value_parser = parse_key_value)]
        inputs: Vec<(String, String)>,
    },
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Usage counters
    Stats,
    /// Server health
    Status,
    /// Recent server log lines
    Logs {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand)]
enum InboxCommand {
    List,
    /// Mark one notification (or all) as read
    Read {
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing input name in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_handle = logging::init_logging()?;

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.api_url {
        config.api_url = url.trim_end_matches('/').to_string();
    }
    if let Some(url) = cli.ws_url {
        config.ws_url = url;
    }
    info!(
        component = "cli",
        event = "cli.started",
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        log_path = %log_handle.log_path.display(),
    );

    let hub = Toolhub::start(config);
    let result = match authenticate(&hub.api, &cli.auth).await {
        Ok(()) => run(&hub, cli.command).await,
        Err(e) => Err(e),
    };
    hub.shutdown();
    result
}

async fn authenticate(api: &ApiClient, auth: &AuthArgs) -> anyhow::Result<()> {
    if let Some(token) = auth.token.as_deref() {
        api.restore(token).await.context("token was rejected")?;
        return Ok(());
    }
    match (auth.email.as_deref(), auth.password.as_deref()) {
        (Some(email), Some(password)) => {
            api.login(email, password).await.context("login failed")?;
            Ok(())
        }
        _ => bail!("no credentials: pass --token, or --email and --password"),
    }
}

async fn run(hub: &Toolhub, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Watch => watch(hub).await,
        Command::Whoami => {
            let user = hub.api.me().await?;
            println!("{}", render::user_table(&user));
            Ok(())
        }
        Command::Tools(cmd) => tools(hub, cmd).await,
        Command::Admin(cmd) => admin(&hub.api, cmd).await,
        Command::Inbox(cmd) => inbox(&hub.api, cmd).await,
    }
}

/// A line typed while `watch` is running
#[derive(Debug, PartialEq, Eq)]
enum WatchInput {
    /// 1-based position in the current list
    Dismiss(usize),
    DismissAll,
    List,
}

fn parse_watch_input(line: &str) -> Option<WatchInput> {
    match line.trim() {
        "l" | "list" => Some(WatchInput::List),
        "c" | "clear" => Some(WatchInput::DismissAll),
        other => {
            let position = other.strip_prefix('d').unwrap_or(other).trim();
            position
                .parse()
                .ok()
                .filter(|n: &usize| *n > 0)
                .map(WatchInput::Dismiss)
        }
    }
}

fn apply_watch_input(hub: &Toolhub, input: WatchInput) {
    match input {
        WatchInput::List => {
            let toasts = hub.notifications.snapshot();
            if toasts.is_empty() {
                println!("{}", console::style("no notifications").dim());
            }
            for (index, notification) in toasts.iter().enumerate() {
                println!("{:>3}. {}", index + 1, render::toast_line(notification));
            }
        }
        WatchInput::DismissAll => hub.notifications.clear(),
        WatchInput::Dismiss(position) => {
            match hub.notifications.snapshot().get(position - 1) {
                Some(notification) => {
                    hub.notifications.remove(&notification.id);
                }
                None => {
                    let note = format!("no notification #{position}");
                    println!("{}", console::style(note).dim());
                }
            }
        }
    }
}

async fn watch(hub: &Toolhub) -> anyhow::Result<()> {
    if let Some(user) = hub.session.user() {
        println!(
            "Watching notifications for {} via {} (Ctrl-C to stop)",
            user.name, hub.config.ws_url
        );
    }
    println!(
        "{}",
        console::style("Type l to list, d <n> to dismiss one, c to dismiss all").dim()
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let mut events = hub.notifications.events();
    let mut visible: HashMap<String, String> = HashMap::new();
    let mut last_state = None;
    let mut status_tick = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(StoreEvent::Inserted(notification)) => {
                    println!("{}", render::toast_line(&notification));
                    visible.insert(notification.id, notification.message);
                }
                Ok(StoreEvent::Removed { id }) => {
                    if let Some(message) = visible.remove(&id) {
                        println!("{}", render::dismissed_line(&message));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        component = "cli",
                        event = "cli.render.lagged",
                        skipped,
                        "Renderer fell behind, redrawing"
                    );
                    visible.clear();
                    for notification in hub.notifications.snapshot() {
                        println!("{}", render::toast_line(&notification));
                        visible.insert(notification.id, notification.message);
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = status_tick.tick() => {
                let state = hub.connection.state();
                if last_state != Some(state) {
                    println!("{}", render::state_line(state));
                    last_state = Some(state);
                }
                if state == ConnectionState::Idle && !hub.session.is_active() {
                    bail!("session ended");
                }
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_watch_input(&line) {
                    Some(input) => apply_watch_input(hub, input),
                    None if line.trim().is_empty() => {}
                    None => println!("{}", console::style("unknown command").dim()),
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = &mut ctrl_c => break,
        }
    }

    Ok(())
}

async fn tools(hub: &Toolhub, command: ToolsCommand) -> anyhow::Result<()> {
    match command {
        ToolsCommand::List {
            search,
            page,
            limit,
            mine,
        } => {
            let user_id = match mine {
                true => hub.session.user().map(|u| u.id),
                false => None,
            };
            let query = ToolQuery {
                page,
                limit,
                search,
                user_id,
            };
            let page = hub.api.list_tools(&query).await?;
            println!("{}", render::tools_table(&page));
            println!("{} of {} tools", page.tools.len(), page.total);
        }
        ToolsCommand::Show { id } => {
            let tool = hub.api.get_tool(&id).await?;
            println!("{}  [{}]", console::style(&tool.title).bold(), tool.category);
            if !tool.description.is_empty() {
                println!("{}", tool.description);
            }
            println!("{}", render::tool_inputs_table(&tool));
        }
        ToolsCommand::Run { id, inputs } => {
            let tool = hub.api.get_tool(&id).await?;
            let mut input = ToolInput::new();
            for (name, raw) in inputs {
                let kind = tool
                    .input_fields
                    .iter()
                    .find(|field| field.name == name)
                    .map(|field| field.kind);
                let value = match kind {
                    Some(InputFieldKind::Number) => raw
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .with_context(|| format!("input {name} must be a number"))?,
                    _ => Value::String(raw),
                };
                input.insert(name, value);
            }

            let missing = tool.missing_inputs(&input);
            if !missing.is_empty() {
                bail!("missing required inputs: {}", missing.join(", "));
            }

            let result = hub.api.run_tool(&id, &input).await?;
            if let Some(error) = result.error {
                bail!("tool failed: {error}");
            }
            match result.result {
                Value::String(text) => println!("{text}"),
                other => println!("{}", serde_json::to_string_pretty(&other)?),
            }
        }
    }
    Ok(())
}

async fn admin(api: &ApiClient, command: AdminCommand) -> anyhow::Result<()> {
    match command {
        AdminCommand::Stats => println!("{}", render::stats_table(&api.admin_stats().await?)),
        AdminCommand::Status => println!("{}", render::status_table(&api.system_status().await?)),
        AdminCommand::Logs { search, limit } => {
            let page = api
                .logs(&PageQuery {
                    page: None,
                    limit,
                    search,
                })
                .await?;
            for entry in page.logs {
                println!("{} {:?} {}", entry.timestamp, entry.level, entry.message);
            }
        }
    }
    Ok(())
}

async fn inbox(api: &ApiClient, command: InboxCommand) -> anyhow::Result<()> {
    match command {
        InboxCommand::List => println!("{}", render::inbox_table(&api.inbox().await?)),
        InboxCommand::Read { all: true, .. } => api.mark_all_read().await?,
        InboxCommand::Read { id: Some(id), .. } => api.mark_read(&id).await?,
        InboxCommand::Read { id: None, .. } => bail!("pass a notification id or --all"),
    }
    Ok(())
}
