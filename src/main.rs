use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use linkmirror::actions::{self, Actions, FieldEdit, LinkEdit};
use linkmirror::airtable::{AirtableClient, RateLimiter};
use linkmirror::auth::{CredentialManager, CredentialState};
use linkmirror::cache::{CacheStore, ListFilter};
use linkmirror::config::Config;
use linkmirror::db;
use linkmirror::sync::{sync_before_read, SyncOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "linkmirror")]
#[command(about = "Mirror Airtable Links and Lists into a local cache for instant queries")]
#[command(version)]
struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/linkmirror/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Bring the cache up to date with the remote base
  Sync {
    /// Sync even if the cache is fresh
    #[arg(short, long)]
    force: bool,
  },
  /// Print cached Links, syncing first when stale
  Links {
    /// Only Links in the List with this id
    #[arg(long, conflicts_with = "list_title")]
    list_id: Option<String>,
    /// Only Links in the List with this title
    #[arg(long)]
    list_title: Option<String>,
  },
  /// Print cached Lists, syncing first when stale
  Lists,
  /// Create a Link, or update one with --id
  SaveLink(SaveLinkArgs),
  /// Mark a Link as done
  CompleteLink { id: String },
  DeleteLink { id: String },
  /// Delete a List, and with --cascade every Link in it
  DeleteList {
    id: String,
    #[arg(long)]
    cascade: bool,
  },
  /// Find a List by title, creating it if needed
  CreateList {
    title: String,
    #[arg(long)]
    note: Option<String>,
  },
  /// Change a List's title or note
  UpdateList {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    note: Option<String>,
  },
  /// Obtain a valid credential, authorizing in the browser if needed
  Auth {
    /// Only report the state of the stored credential
    #[arg(long)]
    status: bool,
  },
  /// Drop cached records so the next sync fetches everything
  ClearCache,
}

#[derive(Args, Debug)]
struct SaveLinkArgs {
  /// Link to update; a new Link is created without it
  #[arg(long)]
  id: Option<String>,
  #[arg(long)]
  url: Option<String>,
  #[arg(long)]
  title: Option<String>,
  #[arg(long, conflicts_with = "clear_note")]
  note: Option<String>,
  #[arg(long)]
  clear_note: bool,
  #[arg(long, conflicts_with = "clear_category")]
  category: Option<String>,
  #[arg(long)]
  clear_category: bool,
  /// Replace the tags (repeatable)
  #[arg(long = "tag")]
  tags: Vec<String>,
  /// Replace the List memberships with these List ids (repeatable)
  #[arg(long = "list")]
  lists: Vec<String>,
  #[arg(long)]
  done: Option<bool>,
  /// Print the resulting Link and any problems without saving
  #[arg(long)]
  dry_run: bool,
}

impl SaveLinkArgs {
  fn edit(&self) -> LinkEdit {
    LinkEdit {
      title: set_or_keep(&self.title),
      url: set_or_keep(&self.url),
      note: clear_set_or_keep(self.clear_note, &self.note),
      category: clear_set_or_keep(self.clear_category, &self.category),
      tags: non_empty_or_keep(&self.tags),
      lists: non_empty_or_keep(&self.lists),
      done: self.done,
    }
  }
}

fn set_or_keep(value: &Option<String>) -> FieldEdit<String> {
  value.clone().map_or(FieldEdit::Keep, FieldEdit::Set)
}

fn clear_set_or_keep(clear: bool, value: &Option<String>) -> FieldEdit<String> {
  if clear {
    FieldEdit::Clear
  } else {
    set_or_keep(value)
  }
}

fn non_empty_or_keep(values: &[String]) -> FieldEdit<Vec<String>> {
  if values.is_empty() {
    FieldEdit::Keep
  } else {
    FieldEdit::Set(values.to_vec())
  }
}

#[derive(Serialize)]
struct AuthStatus {
  state: CredentialState,
  #[serde(skip_serializing_if = "Option::is_none")]
  fingerprint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let cli = Cli::parse();
  let _guard = init_tracing()?;

  let config = Config::load(cli.config.as_deref())?;
  let cache = CacheStore::open(&config.cache_path()?)?;
  let credentials = CredentialManager::new(config.oauth.clone())?;

  match cli.command {
    Command::Auth { status: true } => {
      print_json(&AuthStatus {
        state: credentials.status(&cache)?,
        fingerprint: None,
      })?;
    }
    Command::Auth { status: false } => {
      let credential = credentials.acquire(&cache).await?;
      print_json(&AuthStatus {
        state: credentials.status(&cache)?,
        fingerprint: Some(credential.fingerprint()),
      })?;
    }
    Command::ClearCache => {
      cache.clear()?;
      tracing::info!("Cache cleared");
    }
    Command::Links {
      list_id,
      list_title,
    } => {
      sync_before_read(&cache, config.max_staleness(), || {
        connect(&config, &credentials, &cache)
      })
      .await;
      let filter = list_id
        .map(ListFilter::ById)
        .or(list_title.map(ListFilter::ByTitle));
      print_json(&actions::list_links(&cache, filter.as_ref())?)?;
    }
    Command::Lists => {
      sync_before_read(&cache, config.max_staleness(), || {
        connect(&config, &credentials, &cache)
      })
      .await;
      print_json(&actions::list_lists(&cache)?)?;
    }
    Command::SaveLink(args) if args.dry_run => {
      print_json(&actions::edit_link(&cache, args.id.as_deref(), &args.edit())?)?;
    }
    command => {
      let remote = connect(&config, &credentials, &cache).await?;
      run_remote(command, remote, &config, &cache).await?;
    }
  }

  Ok(())
}

/// Commands that write to or sync from the remote base
async fn run_remote(
  command: Command,
  remote: Arc<AirtableClient>,
  config: &Config,
  cache: &CacheStore,
) -> Result<()> {
  let actions = Actions::new(remote.as_ref(), cache);

  match command {
    Command::Sync { force } => {
      let orchestrator = SyncOrchestrator::new(remote.clone(), config.max_staleness());
      print_json(&orchestrator.sync(cache, force).await?)?
    }
    Command::SaveLink(args) => {
      print_json(&actions.save_link(args.id.as_deref(), &args.edit()).await?)?
    }
    Command::CompleteLink { id } => print_json(&actions.complete_link(&id).await?)?,
    Command::DeleteLink { id } => print_json(&actions.delete_link(&id).await?)?,
    Command::DeleteList { id, cascade } => {
      print_json(&actions.delete_list(&id, cascade).await?)?
    }
    Command::CreateList { title, note } => {
      print_json(&actions.create_list(&title, note.as_deref()).await?)?
    }
    Command::UpdateList { id, title, note } => {
      let mut list = cache.get_list(&id)?;
      if let Some(title) = title {
        list.title = title;
      }
      if let Some(note) = note {
        list.note = Some(note).filter(|n| !n.trim().is_empty());
      }
      print_json(&actions.update_list(&list).await?)?;
    }
    Command::Auth { .. } | Command::ClearCache | Command::Links { .. } | Command::Lists => {}
  }

  Ok(())
}

/// Acquire a credential and build the rate-limited client
async fn connect(
  config: &Config,
  credentials: &CredentialManager,
  cache: &CacheStore,
) -> linkmirror::Result<Arc<AirtableClient>> {
  let credential = credentials.acquire(cache).await?;
  let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
  Ok(Arc::new(AirtableClient::new(
    &config.airtable,
    credential.access_token,
    limiter,
  )?))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Log to a daily file in the data directory. Warnings are echoed to stderr
/// so the manual authorization URL is visible when no browser opens.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = db::data_dir()?;
  std::fs::create_dir_all(&log_dir)?;

  let appender = tracing_appender::rolling::daily(&log_dir, "linkmirror.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    EnvFilter::try_from_env("LINKMIRROR_LOG").unwrap_or_else(|_| EnvFilter::new("linkmirror=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(
      fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_filter(LevelFilter::WARN),
    )
    .init();

  Ok(guard)
}
