mod daemon;
pub mod session;

use anyhow::bail;

use ab_core::registry::SessionRegistry;
use ab_protocol::{Command, CommandKind, Response, SnapshotOptions};

use crate::cli::{Cli, Commands, DaemonCommands, SessionCommands};

/// Global flags that travel with every command.
pub struct Globals {
    pub session: String,
    pub json: bool,
    pub headed: bool,
    pub backend: Option<String>,
    pub user_data_dir: Option<std::path::PathBuf>,
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let registry = SessionRegistry::system();
    let globals = Globals {
        session: cli.session,
        json: cli.json,
        headed: cli.headed,
        backend: cli.backend,
        user_data_dir: cli.user_data_dir,
    };

    match cli.command {
        Commands::Daemon { command: DaemonCommands::Run } => {
            daemon::run(&registry, &globals.session).await
        }
        Commands::Session { command } => match command {
            SessionCommands::List => session::list(&registry),
            SessionCommands::Stop { all } => session::stop(&registry, &globals.session, all).await,
        },
        // Closing a session that has no daemon must not spawn one just
        // to tear it down again.
        Commands::Close => session::stop(&registry, &globals.session, false).await,
        command => {
            let launch_action = matches!(command, Commands::Launch | Commands::Navigate { .. });
            let kind = to_kind(command);
            let mut client = session::ensure_daemon(&registry, &globals, launch_action).await?;

            let cmd = Command { id: format!("{}-1", std::process::id()), kind };
            let resp = client.send(&cmd).await?;
            print_response(&cmd.kind, resp, globals.json)
        }
    }
}

fn to_kind(command: Commands) -> CommandKind {
    match command {
        Commands::Launch => CommandKind::Launch { headless: None, viewport: None },
        Commands::Navigate { url, wait_until } => CommandKind::Navigate { url, wait_until },
        Commands::Back => CommandKind::Back,
        Commands::Forward => CommandKind::Forward,
        Commands::Reload => CommandKind::Reload,
        Commands::Click { selector } => CommandKind::Click { selector },
        Commands::Dblclick { selector } => CommandKind::DoubleClick { selector },
        Commands::Fill { selector, value } => CommandKind::Fill { selector, value },
        Commands::Type { selector, text, delay } => CommandKind::Type { selector, text, delay },
        Commands::Press { key, selector } => CommandKind::Press { key, selector },
        Commands::Hover { selector } => CommandKind::Hover { selector },
        Commands::Focus { selector } => CommandKind::Focus { selector },
        Commands::Check { selector } => CommandKind::Check { selector },
        Commands::Uncheck { selector } => CommandKind::Uncheck { selector },
        Commands::Select { selector, values } => CommandKind::Select { selector, values },
        Commands::Text { selector } => CommandKind::GetText { selector },
        Commands::Attr { selector, attribute } => CommandKind::GetAttribute { selector, attribute },
        Commands::Visible { selector } => CommandKind::IsVisible { selector },
        Commands::Count { selector } => CommandKind::Count { selector },
        Commands::Eval { script } => CommandKind::Evaluate { script },
        Commands::Wait { selector, timeout, state } => {
            CommandKind::Wait { selector, timeout, state }
        }
        Commands::Url => CommandKind::Url,
        Commands::Title => CommandKind::Title,
        Commands::Content { selector } => CommandKind::Content { selector },
        Commands::Screenshot { path, full_page, selector } => {
            CommandKind::Screenshot { path, full_page, selector }
        }
        Commands::Snapshot { interactive, max_depth, compact, selector } => {
            CommandKind::Snapshot {
                options: SnapshotOptions { interactive, max_depth, compact, selector },
            }
        }
        Commands::Close | Commands::Session { .. } | Commands::Daemon { .. } => {
            unreachable!("handled before to_kind")
        }
    }
}

/// Renders one response. `--json` prints the raw frame; otherwise each
/// action gets the terse human form of its payload.
fn print_response(kind: &CommandKind, resp: Response, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(&resp)?);
        if resp.success {
            return Ok(());
        }
        bail!("command failed");
    }
    if !resp.success {
        bail!(resp.error.unwrap_or_else(|| "command failed".into()));
    }

    let data = resp.data.unwrap_or(serde_json::Value::Null);
    let field = |name: &str| {
        data.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    match kind {
        CommandKind::Navigate { .. } => {
            println!("{} - {}", field("url"), field("title"));
        }
        CommandKind::GetText { .. } => println!("{}", field("text")),
        CommandKind::GetAttribute { .. } => match data.get("value") {
            Some(serde_json::Value::String(value)) => println!("{value}"),
            _ => println!("null"),
        },
        CommandKind::IsVisible { .. } => {
            println!("{}", data.get("visible").and_then(|v| v.as_bool()).unwrap_or(false));
        }
        CommandKind::Count { .. } => {
            println!("{}", data.get("count").and_then(|v| v.as_u64()).unwrap_or(0));
        }
        CommandKind::Evaluate { .. } => {
            let result = data.get("result").cloned().unwrap_or(serde_json::Value::Null);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        CommandKind::Url => println!("{}", field("url")),
        CommandKind::Title => println!("{}", field("title")),
        CommandKind::Content { .. } => println!("{}", field("content")),
        CommandKind::Screenshot { .. } => {
            if let Some(path) = data.get("path").and_then(|v| v.as_str()) {
                println!("{path}");
            } else {
                println!("{}", field("base64"));
            }
        }
        CommandKind::Snapshot { .. } => println!("{}", field("snapshot")),
        // Side-effect actions print nothing on success.
        _ => {}
    }
    Ok(())
}
