use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::info;

use folder_picker::app::App;
use folder_picker::config::{AppConfig, TreeConfig, WatcherConfig};
use folder_picker::error::{PickerError, Result};
use folder_picker::logging;
use folder_picker::projection::render_text;

/// Pick files from one or more folders and print the resulting tree or prompt.
#[derive(Parser, Debug)]
#[command(name = "fpick", version, about)]
struct Cli {
    /// Folders to add (defaults to configured roots, then the current directory)
    paths: Vec<PathBuf>,

    /// Explicit config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable filesystem watcher (live updates)
    #[arg(long)]
    no_watcher: bool,

    /// Levels to expand below each folder
    #[arg(long)]
    depth: Option<usize>,

    /// Check a file or folder; may be repeated
    #[arg(long, value_name = "PATH")]
    check: Vec<PathBuf>,

    /// Keep running and reprint the tree on every change
    #[arg(long)]
    watch: bool,

    /// Print the prompt built from the checked files instead of the tree
    #[arg(long)]
    prompt: bool,
}

impl Cli {
    /// CLI flags as the highest-priority config layer.
    fn overrides(&self) -> AppConfig {
        AppConfig {
            watcher: WatcherConfig {
                enabled: self.no_watcher.then_some(false),
                ..Default::default()
            },
            tree: TreeConfig {
                expand_depth: self.depth,
            },
            ..Default::default()
        }
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| PickerError::from_io(&e, path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config =
        logging::bootstrap(|| AppConfig::load(cli.config.as_deref(), Some(&cli.overrides())));
    logging::init(&config);

    let mut app = App::new(&config);
    if !app.watcher_active {
        info!("live updates off");
    }

    let roots = if !cli.paths.is_empty() {
        cli.paths.clone()
    } else if !config.roots().is_empty() {
        config.roots()
    } else {
        vec![PathBuf::from(".")]
    };

    // A bad folder is reported and skipped; the others still load.
    for path in &roots {
        if let Err(e) = canonical(path).and_then(|p| app.add_folder(&p)) {
            eprintln!("⚠ {}", e);
        }
    }
    app.expand_to_depth(config.expand_depth()).await?;

    for path in &cli.check {
        let id = app.reveal(&canonical(path)?).await?;
        app.set_checked(id, true)?;
    }

    if cli.prompt {
        let prompt = app.prompt();
        print!("{}", prompt.build());
        let summary = prompt.summary();
        eprintln!(
            "Files: {} total ({} readable, {} unreadable)",
            summary.total, summary.readable, summary.unreadable
        );
        return Ok(());
    }

    print!("{}", render_text(&app.rows()));

    if cli.watch {
        let mut refresh = app.subscribe();
        refresh.borrow_and_update();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                res = app.next_event() => res?,
            }
            if refresh.has_changed().unwrap_or(false) {
                refresh.borrow_and_update();
                println!();
                print!("{}", render_text(&app.rows()));
            }
        }
    }

    Ok(())
}
