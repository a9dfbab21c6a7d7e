use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, warn};

use fm_tree::app::{App, BufferSync, Level, Prompt, RenderSink};
use fm_tree::config::{AppConfig, GeneralConfig, Settings};
use fm_tree::error::{AppError, Result};
use fm_tree::event::{Event, EventHandler};
use fm_tree::fs::paths::{ancestors, is_parent};
use fm_tree::fs::watcher::{self, FsWatcher};
use fm_tree::state::{Delta, TreeState};

/// Print and edit a lazily-expanded directory tree.
#[derive(Parser, Debug)]
#[command(name = "fmtree", version, about)]
struct Cli {
    /// Explicit config file, layered over the discovered ones
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show hidden entries
    #[arg(long, global = true)]
    show_hidden: bool,

    #[arg(long, short, default_value = "warn", value_enum, global = true)]
    log_level: LogLevel,

    /// Expand this directory (and its parents) before running the command
    #[arg(long = "expand", value_name = "DIR", global = true)]
    expand: Vec<PathBuf>,

    /// Root directory of the tree
    #[arg(default_value = ".")]
    path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the tree
    Show,
    /// Print the tree and reprint it on every filesystem change
    Watch,
    /// Create a file (or a folder, with a trailing `/`) next to a row
    New {
        #[arg(long, default_value_t = 0)]
        row: usize,
        /// Name to create; read from stdin when omitted
        #[arg(long)]
        name: Option<String>,
    },
    /// Move the entry at a row to a new root-relative path
    Rename {
        #[arg(long)]
        row: usize,
        /// New path; read from stdin when omitted
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete the selection, or the entry at a row
    Delete {
        #[arg(long, default_value_t = 0)]
        row: usize,
        #[arg(long, num_args = 1..)]
        select: Vec<PathBuf>,
        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },
    /// Move the selection next to (or into) the entry at a row
    Cut(Transfer),
    /// Copy the selection next to (or into) the entry at a row
    Copy(Transfer),
}

#[derive(Args, Debug)]
struct Transfer {
    #[arg(long)]
    row: usize,
    #[arg(long, required = true, num_args = 1..)]
    select: Vec<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Silent,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<tracing::Level> {
        match self {
            LogLevel::Debug => Some(tracing::Level::DEBUG),
            LogLevel::Info => Some(tracing::Level::INFO),
            LogLevel::Warn => Some(tracing::Level::WARN),
            LogLevel::Error => Some(tracing::Level::ERROR),
            LogLevel::Silent => None,
        }
    }
}

/// Stdio host: the tree goes to stdout, prompts and notices to stderr.
struct Terminal {
    answer: Option<String>,
    assume_yes: bool,
}

impl Terminal {
    fn read_line(prompt: &str) -> Option<String> {
        eprint!("{} ", prompt);
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl RenderSink for Terminal {
    fn render(&mut self, lines: &[String]) {
        let mut out = io::stdout().lock();
        for line in lines {
            let _ = writeln!(out, "{}", line);
        }
        let _ = out.flush();
    }

    fn notify(&mut self, level: Level, message: &str) {
        let tag = match level {
            Level::Info => "info",
            Level::Warn => "warning",
            Level::Error => "error",
        };
        eprintln!("{}: {}", tag, message);
    }
}

impl BufferSync for Terminal {
    fn kill_buffers(&mut self, paths: &HashSet<PathBuf>) {
        debug!(count = paths.len(), "no open buffers to close");
    }

    fn open_file(&mut self, path: &Path) {
        println!("{}", path.display());
    }
}

impl Prompt for Terminal {
    fn confirm(&mut self, question: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        Self::read_line(&format!("{}\n[y/N]", question))
            .map(|answer| matches!(answer.trim(), "y" | "Y" | "yes"))
            .unwrap_or(false)
    }

    fn input(&mut self, prompt: &str, default: &str) -> Option<String> {
        if let Some(answer) = self.answer.take() {
            return Some(answer);
        }
        let label = if default.is_empty() {
            prompt.to_string()
        } else {
            format!("{} [{}]", prompt, default)
        };
        Self::read_line(&label).map(|line| {
            if line.trim().is_empty() {
                default.to_string()
            } else {
                line
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(&cli);
    debug!("Parsed CLI arguments: {cli:?}");

    let overrides = AppConfig {
        general: GeneralConfig {
            show_hidden: cli.show_hidden.then_some(true),
            ..Default::default()
        },
        ..Default::default()
    };
    let config = AppConfig::load(cli.config.as_deref(), Some(&overrides));
    let settings = Settings::from_config(&config)?;

    let (answer, assume_yes, select) = match &cli.command {
        Command::New { name, .. } | Command::Rename { name, .. } => (name.clone(), false, &[][..]),
        Command::Delete { select, yes, .. } => (None, *yes, &select[..]),
        Command::Cut(t) | Command::Copy(t) => (None, false, &t.select[..]),
        Command::Show | Command::Watch => (None, false, &[][..]),
    };

    let state = initial_state(&cli.path, &cli.expand, select, &settings)?;
    let host = Terminal { answer, assume_yes };
    let mut app = App::with_state(state, settings, host);
    let start = app.state().version();

    let result = match cli.command {
        Command::Show => {
            app.redraw();
            return Ok(());
        }
        Command::Watch => return watch(&mut app, &config).await,
        Command::New { row, .. } => app.new_entry(row),
        Command::Rename { row, .. } => app.rename(row),
        Command::Delete { row, .. } => app.delete(row),
        Command::Cut(t) => app.cut(t.row),
        Command::Copy(t) => app.copy(t.row),
    };

    if result.is_ok() && app.state().version() == start {
        app.redraw();
    }
    result.map(|_| ())
}

fn setup_tracing(cli: &Cli) {
    if let Some(level) = cli.log_level.to_tracing_level() {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(io::stderr)
            .without_time()
            .compact()
            .init();
    }
}

/// Root snapshot with `expand` opened and `select` selected (and revealed).
fn initial_state(
    root: &Path,
    expand: &[PathBuf],
    select: &[PathBuf],
    settings: &Settings,
) -> Result<TreeState> {
    let state = TreeState::new(root, settings)?;
    if expand.is_empty() && select.is_empty() {
        return Ok(state);
    }

    let root = state.root().path.clone();
    let inside = |p: &PathBuf| *p == root || is_parent(&root, p);
    let mut index = state.index().clone();
    let mut selection = HashSet::new();

    for dir in expand {
        let dir = resolve(dir)?;
        index.extend(ancestors(&dir).into_iter().filter(inside));
        if inside(&dir) {
            index.insert(dir);
        } else {
            warn!(path = %dir.display(), "not below the root, ignoring");
        }
    }
    for path in select {
        let path = resolve(path)?;
        if !is_parent(&root, &path) {
            warn!(path = %path.display(), "not below the root, ignoring");
            continue;
        }
        index.extend(ancestors(&path).into_iter().filter(inside));
        selection.insert(path);
    }

    Ok(state.advance(settings, Delta::default().index(index).selection(selection)))
}

fn resolve(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .map_err(|_| AppError::InvalidPath(format!("{} does not exist", path.display())))
}

async fn watch(app: &mut App<Terminal>, config: &AppConfig) -> Result<()> {
    let mut events = EventHandler::new();
    let root = app.state().root().path.clone();

    let _watcher = if config.watcher_enabled() {
        let ignore_patterns: Vec<String> = watcher::DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .collect();
        Some(FsWatcher::new(
            &root,
            Duration::from_millis(config.debounce_ms()),
            ignore_patterns,
            watcher::DEFAULT_FLOOD_THRESHOLD,
            events.sender(),
        )?)
    } else {
        warn!("watcher disabled in config; waiting for Ctrl-C");
        None
    };

    app.redraw();
    while let Some(event) = events.next().await {
        match event {
            Event::FsChange(paths) => {
                app.external_change(&paths)?;
            }
            Event::Interrupt => break,
        }
    }
    Ok(())
}
