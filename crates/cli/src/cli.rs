use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ab")]
#[command(about = "agent-browser - session-based browser automation for agents")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Session name; each session gets its own daemon and browser
    #[arg(short, long, global = true, env = "AB_SESSION", default_value = "default")]
    pub session: String,

    /// Print raw JSON responses instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Run the browser with a visible window
    #[arg(long, global = true)]
    pub headed: bool,

    /// Automation backend for this session
    #[arg(short, long, global = true, env = "AB_BACKEND")]
    pub backend: Option<String>,

    /// Browser profile directory to persist cookies and storage
    #[arg(long, global = true, env = "AB_USER_DATA_DIR", value_name = "DIR")]
    pub user_data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the browser without navigating anywhere
    Launch,

    /// Navigate to a URL
    #[command(alias = "open")]
    Navigate {
        url: String,
        /// Load state to wait for (load, domcontentloaded)
        #[arg(long, value_name = "STATE")]
        wait_until: Option<String>,
    },

    /// Go back in history
    Back,
    /// Go forward in history
    Forward,
    /// Reload the current page
    Reload,

    /// Click an element (selector or @ref)
    Click { selector: String },
    /// Double-click an element
    Dblclick { selector: String },
    /// Clear a field and set its value
    Fill { selector: String, value: String },
    /// Type text into an element
    Type {
        selector: String,
        text: String,
        /// Delay between keystrokes (ms)
        #[arg(long, default_value = "0")]
        delay: u64,
    },
    /// Press a key, optionally on a specific element
    Press {
        key: String,
        #[arg(long)]
        selector: Option<String>,
    },
    /// Hover over an element
    Hover { selector: String },
    /// Focus an element
    Focus { selector: String },
    /// Check a checkbox
    Check { selector: String },
    /// Uncheck a checkbox
    Uncheck { selector: String },
    /// Select option(s) in a dropdown
    Select {
        selector: String,
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Get an element's text content
    #[command(alias = "gettext")]
    Text { selector: String },
    /// Get an element's attribute value
    #[command(alias = "getattribute")]
    Attr { selector: String, attribute: String },
    /// Check whether an element is visible
    #[command(alias = "isvisible")]
    Visible { selector: String },
    /// Count elements matching a selector
    Count { selector: String },

    /// Evaluate JavaScript in the page and print the result
    Eval { script: String },

    /// Wait for an element, or pause when no selector is given
    Wait {
        selector: Option<String>,
        /// Timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Target state (visible, hidden)
        #[arg(long)]
        state: Option<String>,
    },

    /// Print the current URL
    Url,
    /// Print the current page title
    Title,
    /// Print page HTML, or one element's outer HTML
    Content {
        #[arg(long)]
        selector: Option<String>,
    },

    /// Capture a screenshot
    #[command(alias = "ss")]
    Screenshot {
        /// Write PNG to this path instead of printing base64
        #[arg(short, long)]
        path: Option<String>,
        /// Capture the full scrollable page
        #[arg(long)]
        full_page: bool,
        /// Capture only this element
        #[arg(long)]
        selector: Option<String>,
    },

    /// Print the accessibility snapshot with element refs
    Snapshot {
        /// Only interactive elements
        #[arg(short, long)]
        interactive: bool,
        /// Prune nodes deeper than this (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_depth: u32,
        /// Collapse unnamed structural nodes
        #[arg(long)]
        compact: bool,
        /// Scope the snapshot to this selector's subtree
        #[arg(long)]
        selector: Option<String>,
    },

    /// Close the browser and stop this session's daemon
    Close,

    /// Manage session daemons
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Daemon internals (spawned automatically; not for interactive use)
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List sessions with a live daemon
    List,
    /// Stop one session's daemon, or all of them
    Stop {
        /// Stop every running session
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Run a session daemon in the foreground
    #[command(hide = true)]
    Run,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_session_flag() {
        let cli = Cli::try_parse_from(["ab", "-s", "work", "url"]).unwrap();
        assert_eq!(cli.session, "work");
        assert!(matches!(cli.command, Commands::Url));
    }

    #[test]
    fn session_defaults_to_default() {
        let cli = Cli::try_parse_from(["ab", "title"]).unwrap();
        assert_eq!(cli.session, "default");
    }

    #[test]
    fn open_is_an_alias_for_navigate() {
        let cli = Cli::try_parse_from(["ab", "open", "https://example.com"]).unwrap();
        match cli.command {
            Commands::Navigate { url, wait_until } => {
                assert_eq!(url, "https://example.com");
                assert!(wait_until.is_none());
            }
            other => panic!("expected navigate, got {other:?}"),
        }
    }

    #[test]
    fn select_requires_at_least_one_value() {
        assert!(Cli::try_parse_from(["ab", "select", "#lang"]).is_err());
        let cli = Cli::try_parse_from(["ab", "select", "#lang", "rust", "go"]).unwrap();
        match cli.command {
            Commands::Select { values, .. } => assert_eq!(values, vec!["rust", "go"]),
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_flags_parse() {
        let cli = Cli::try_parse_from([
            "ab", "snapshot", "-i", "--max-depth", "3", "--compact",
        ])
        .unwrap();
        match cli.command {
            Commands::Snapshot { interactive, max_depth, compact, selector } => {
                assert!(interactive);
                assert_eq!(max_depth, 3);
                assert!(compact);
                assert!(selector.is_none());
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn wait_selector_is_optional() {
        let cli = Cli::try_parse_from(["ab", "wait", "--timeout", "500"]).unwrap();
        match cli.command {
            Commands::Wait { selector, timeout, .. } => {
                assert!(selector.is_none());
                assert_eq!(timeout, Some(500));
            }
            other => panic!("expected wait, got {other:?}"),
        }
    }
}
