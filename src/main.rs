use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;

use chanwatch::app::App;
use chanwatch::config::Config;
use chanwatch::model::{
    BoardDescriptor, FilterScope, FilterTarget, SiteDescriptor, ThreadDescriptor, WatchFilter,
};
use chanwatch::registry::ChanBoard;
use chanwatch::storage::DatabaseError;
use chanwatch::watcher::AppVisibility;

#[derive(Parser, Debug)]
#[command(name = "chanwatch", about = "Imageboard thread watcher")]
struct Args {
    /// Config file (default: ~/.config/chanwatch/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Site to operate on (default: the first configured site)
    #[arg(long, global = true)]
    site: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch bookmarked threads until interrupted
    Watch {
        /// Behave as a hidden app: poll through the background scheduler
        #[arg(long)]
        background: bool,
    },
    /// Scan active board catalogs once and bookmark matching threads
    FilterWatch,
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
    #[command(subcommand)]
    Filter(FilterCommand),
    #[command(subcommand)]
    Board(BoardCommand),
}

#[derive(Subcommand, Debug)]
enum BookmarkCommand {
    Add { board: String, thread: u64 },
    Remove { board: String, thread: u64 },
    List,
}

#[derive(Subcommand, Debug)]
enum FilterCommand {
    /// Add a watch filter (plain text with `*` wildcards, or `/regex/flags`)
    Add {
        pattern: String,
        /// Match thread subjects
        #[arg(long)]
        subject: bool,
        /// Match thread comments
        #[arg(long)]
        comment: bool,
        /// Limit to these boards (default: all active boards)
        #[arg(long = "board", value_name = "CODE")]
        boards: Vec<String>,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum BoardCommand {
    /// Register boards and mark them active
    Add { codes: Vec<String> },
    Activate { codes: Vec<String> },
    Deactivate { codes: Vec<String> },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match args.config.clone().or_else(Config::default_path) {
        Some(path) => path,
        None => anyhow::bail!("HOME is not set; pass --config"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;

    let site = args
        .site
        .clone()
        .or_else(|| config.sites.first().map(|s| s.name.clone()))
        .map(SiteDescriptor::new)
        .ok_or_else(|| anyhow::anyhow!("No site configured"))?;

    let app = match App::open(config).await {
        Ok(app) => app,
        Err(e)
            if matches!(
                e.downcast_ref::<DatabaseError>(),
                Some(DatabaseError::InstanceLocked)
            ) =>
        {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e),
    };

    match args.command {
        Command::Watch { background } => watch(&app, background).await,
        Command::FilterWatch => filter_watch(&app).await,
        Command::Bookmark(command) => {
            app.initialize().await?;
            bookmark(&app, &site, command).await
        }
        Command::Filter(command) => {
            app.initialize().await?;
            filter(&app, &site, command).await
        }
        Command::Board(command) => {
            app.initialize().await?;
            board(&app, &site, command).await
        }
    }
}

async fn watch(app: &App, background: bool) -> Result<()> {
    if background {
        app.visibility.set(AppVisibility::Background);
    }
    let coordinator = app.start_watching().await?;
    let filter_watch = app.spawn_filter_watch();

    println!("Watching bookmarks, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    app.shutdown();
    coordinator.abort();
    if let Some(task) = filter_watch {
        task.abort();
    }
    println!("Goodbye!");
    Ok(())
}

async fn filter_watch(app: &App) -> Result<()> {
    app.initialize().await?;
    let added = app.run_filter_watch().await?;

    println!("{} new bookmarks", added.len());
    for bookmark in &added {
        println!(
            "{}  {}",
            bookmark.descriptor,
            bookmark.title.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn bookmark(app: &App, site: &SiteDescriptor, command: BookmarkCommand) -> Result<()> {
    match command {
        BookmarkCommand::Add { board, thread } => {
            let thread = ThreadDescriptor::new(BoardDescriptor::new(site.clone(), board), thread);
            if app.add_bookmark(thread.clone()).await? {
                println!("Bookmarked {thread}");
            } else {
                println!("{thread} is already bookmarked");
            }
        }
        BookmarkCommand::Remove { board, thread } => {
            let thread = ThreadDescriptor::new(BoardDescriptor::new(site.clone(), board), thread);
            let deleted = app.bookmarks.delete_bookmarks(&[thread.clone()]).await?;
            if deleted.is_empty() {
                println!("{thread} is not bookmarked");
            } else {
                println!("Removed {thread}");
            }
        }
        BookmarkCommand::List => {
            for bookmark in app.bookmarks.bookmarks_snapshot().await {
                let status = if bookmark.is_dead {
                    "dead"
                } else if bookmark.is_active {
                    "active"
                } else {
                    "inactive"
                };
                println!(
                    "{}  [{}{}]  {} unseen  {}",
                    bookmark.descriptor,
                    status,
                    if bookmark.is_filter_watch { ", filter" } else { "" },
                    bookmark.unseen_posts_count(),
                    bookmark.title.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

async fn filter(app: &App, site: &SiteDescriptor, command: FilterCommand) -> Result<()> {
    match command {
        FilterCommand::Add {
            pattern,
            subject,
            comment,
            boards,
        } => {
            let mut targets = Vec::new();
            if subject || !comment {
                targets.push(FilterTarget::Subject);
            }
            if comment {
                targets.push(FilterTarget::Comment);
            }
            let scope = if boards.is_empty() {
                FilterScope::All
            } else {
                FilterScope::Boards(
                    boards
                        .iter()
                        .map(|code| BoardDescriptor::new(site.clone(), code))
                        .collect(),
                )
            };
            let id = app
                .filters
                .add_filter(WatchFilter::new(targets, pattern, scope))
                .await?;
            println!("Added filter {id}");
        }
        FilterCommand::List => {
            app.filters.view_all_filters(|chan_filter| {
                let filter = &chan_filter.filter;
                let scope = match &filter.scope {
                    FilterScope::All => "all boards".to_string(),
                    FilterScope::Boards(boards) => boards
                        .iter()
                        .map(|b| format!("/{}/", b.code()))
                        .collect::<Vec<_>>()
                        .join(" "),
                };
                println!(
                    "{:>4}  {}  {:?}  {}{}",
                    filter.id.unwrap_or_default(),
                    filter.pattern,
                    filter.targets,
                    scope,
                    if filter.enabled { "" } else { "  (disabled)" }
                );
            });
        }
    }
    Ok(())
}

async fn board(app: &App, site: &SiteDescriptor, command: BoardCommand) -> Result<()> {
    match command {
        BoardCommand::Add { codes } => {
            let boards = codes
                .iter()
                .map(|code| ChanBoard {
                    descriptor: BoardDescriptor::new(site.clone(), code),
                    name: None,
                    active: false,
                })
                .collect();
            app.boards.add_boards(boards).await?;
            let codes: BTreeSet<String> = codes.into_iter().collect();
            app.boards.activate_deactivate(site, &codes, true).await?;
            println!("Added {} boards", codes.len());
        }
        BoardCommand::Activate { codes } => {
            let changed = app
                .boards
                .activate_deactivate(site, &codes.into_iter().collect(), true)
                .await?;
            println!("{}", if changed { "Activated" } else { "Nothing changed" });
        }
        BoardCommand::Deactivate { codes } => {
            let changed = app
                .boards
                .activate_deactivate(site, &codes.into_iter().collect(), false)
                .await?;
            println!("{}", if changed { "Deactivated" } else { "Nothing changed" });
        }
        BoardCommand::List => {
            for board in app.boards.all_boards() {
                if board.descriptor.site == *site {
                    println!(
                        "{}  {}",
                        board.descriptor,
                        if board.active { "active" } else { "" }
                    );
                }
            }
        }
    }
    Ok(())
}
