//! # OpenSoul CLI (`soul`)
//!
//! The `soul` binary drives the personality-document lifecycle from the
//! terminal, and can also run the registry server.
//!
//! ## Usage
//!
//! ```bash
//! soul --config ./config/opensoul.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `soul apply <token>` | Resolve a soul (path, cache, or registry) and swap it in |
//! | `soul rollback` | Restore the original personality file from backup |
//! | `soul status` | Show swap state, backup presence, and a preview |
//! | `soul cached list` | List cached souls, most recently used first |
//! | `soul cached remove <name>` | Drop a soul from the cache |
//! | `soul search [query]` | Browse the registry |
//! | `soul publish <file>` | Upload a soul to the registry |
//! | `soul rate <ident> <value>` | Rate a registry soul 1–5 |
//! | `soul init` | Create the registry database |
//! | `soul serve` | Start the registry HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Swap in a soul from the registry (cached for next time)
//! soul apply pirate-captain
//!
//! # Swap in a local file directly
//! soul apply ./personas/night-owl.md
//!
//! # See what is active and whether a backup exists
//! soul status
//!
//! # Put the original back
//! soul rollback
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use opensoul::{apply, cache_cmd, config, migrate, publish, search, server};

/// OpenSoul — swap an AI agent's personality document from a shared
/// registry, and safely undo it.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file is created with defaults on first use.
#[derive(Parser)]
#[command(
    name = "soul",
    about = "OpenSoul — swap an AI agent's personality document, and safely undo it",
    version,
    long_about = "OpenSoul manages the lifecycle of an agent's personality document: resolve a \
    soul from a local path, the local cache, or the shared registry; swap it into the active \
    file while preserving a backup of the original; and roll back at any time."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/opensoul.toml`. Created from defaults when
    /// missing; missing fields are filled in and written back.
    #[arg(long, global = true, default_value = "./config/opensoul.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Resolve a soul and swap it into the active personality file.
    ///
    /// The token is tried as a filesystem path first, then as an exact
    /// cache entry, then against the registry. Fuzzy cache matches are
    /// reported, never guessed. The first swap from an original file
    /// captures a backup; later swaps leave the backup untouched.
    Apply {
        /// A file path, a cached soul name, or a registry label.
        token: String,
    },

    /// Restore the original personality file from the backup slot.
    ///
    /// Repeatable: rollback copies the backup without consuming it.
    Rollback,

    /// Show the active file's state, backup presence, and a preview.
    Status,

    /// Inspect and prune the local soul cache.
    Cached {
        #[command(subcommand)]
        action: CachedAction,
    },

    /// Search the registry.
    ///
    /// Filters apply before ranking and pagination.
    Search {
        /// Substring matched against name, description, and owner.
        query: Option<String>,

        /// Only souls carrying this exact tag.
        #[arg(long)]
        tag: Option<String>,

        /// Sort order: `recent` (default), `popular`, or `top`.
        #[arg(long)]
        sort: Option<String>,

        /// Page number (1-based).
        #[arg(long)]
        page: Option<i64>,

        /// Results per page (1–100, default 20).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Upload a soul document to the registry.
    Publish {
        /// Path to the soul document (markdown).
        file: PathBuf,

        /// Display name; the unique label is derived from it.
        #[arg(long)]
        name: String,

        /// Owner identity recorded on the soul.
        #[arg(long)]
        owner: String,

        /// One-line description.
        #[arg(long)]
        description: Option<String>,

        /// Tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Rate a registry soul.
    Rate {
        /// Soul slug or label.
        ident: String,

        /// Rating value, an integer from 1 to 5. Rating again overwrites
        /// your previous rating.
        value: i64,

        /// Rater identity.
        #[arg(long)]
        rater: String,
    },

    /// Initialize the registry database schema.
    ///
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Start the registry HTTP server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

/// Cache management subcommands.
#[derive(Subcommand)]
enum CachedAction {
    /// List cached souls, most recently activated first.
    List,
    /// Remove a cached soul by name.
    Remove {
        /// Cached soul name (case-insensitive).
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Apply { token } => {
            apply::run_apply(&cfg, &token).await?;
        }
        Commands::Rollback => {
            apply::run_rollback(&cfg)?;
        }
        Commands::Status => {
            apply::run_status(&cfg)?;
        }
        Commands::Cached { action } => match action {
            CachedAction::List => {
                cache_cmd::run_list(&cfg)?;
            }
            CachedAction::Remove { name } => {
                cache_cmd::run_remove(&cfg, &name)?;
            }
        },
        Commands::Search {
            query,
            tag,
            sort,
            page,
            limit,
        } => {
            search::run_search(&cfg, query, tag, sort, page, limit).await?;
        }
        Commands::Publish {
            file,
            name,
            owner,
            description,
            tags,
        } => {
            publish::run_publish(&cfg, &file, name, owner, description, tags).await?;
        }
        Commands::Rate {
            ident,
            value,
            rater,
        } => {
            publish::run_rate(&cfg, &ident, value, rater).await?;
        }
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Registry database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
