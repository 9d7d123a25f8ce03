use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use querycache_core::{CacheKey, Config, StoreBackend, Table, UNNAMED_DB};
use querycache_executor::database_from_uri;
use querycache_store::{Cache, EntryMetadata};

const DEFAULT_CONFIG: &str = "querycache.toml";

/// QueryCache - on-disk cache for SQL query results
#[derive(Parser)]
#[command(name = "querycache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: querycache.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache root directory
    #[arg(long, global = true)]
    cache_store: Option<PathBuf>,

    /// Cache namespace (default: database name from --uri, else "unnameddb")
    #[arg(short, long, global = true)]
    name: Option<String>,

    /// Connection string; also read from QUERYCACHE_URI
    #[arg(short, long, global = true)]
    uri: Option<String>,

    /// Storage backend: parquet or bincode
    #[arg(short, long, global = true)]
    backend: Option<StoreBackend>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached entries
    List,

    /// Show the metadata and first rows of one entry
    Show {
        /// SQL text, or @path to read it from a file
        #[arg(required_unless_present = "key")]
        sql: Option<String>,

        /// Look the entry up by key instead of SQL
        #[arg(short, long, conflicts_with = "sql")]
        key: Option<String>,

        /// Number of rows to print
        #[arg(short, long, default_value_t = 10)]
        rows: usize,
    },

    /// Print the normalized form and cache key of a query
    Key {
        /// SQL text, or @path to read it from a file
        sql: String,
    },

    /// Export entries into a zip bundle (every entry when no --key/--query is given)
    Export {
        /// Destination archive; ".zip" is appended when missing
        destination: PathBuf,

        /// Key to include (repeatable)
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Query whose entry to include (repeatable)
        #[arg(short, long = "query")]
        queries: Vec<String>,
    },

    /// Import a zip bundle, overwriting entries with the same key
    Import {
        /// Archive to import
        source: PathBuf,
    },

    /// Delete one entry
    Delete {
        /// SQL text, or @path to read it from a file
        #[arg(required_unless_present = "key")]
        sql: Option<String>,

        /// Delete by key instead of SQL
        #[arg(short, long, conflicts_with = "sql")]
        key: Option<String>,
    },

    /// Delete every entry in the namespace
    Clear,

    /// Run a query through the cache
    #[cfg(feature = "postgres")]
    Query {
        /// SQL text, or @path to read it from a file
        sql: String,

        /// Ignore a stored result and overwrite it
        #[arg(short, long)]
        force: bool,

        /// Bypass the cache entirely
        #[arg(long)]
        no_cache: bool,

        /// Connect with TLS
        #[arg(long)]
        tls: bool,

        /// Number of rows to print
        #[arg(short, long, default_value_t = 10)]
        rows: usize,

        /// Also export the entry this query used into a bundle
        #[arg(short, long)]
        export_session: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    let uri = cli
        .uri
        .clone()
        .or_else(|| std::env::var("QUERYCACHE_URI").ok());

    if cli.verbose {
        eprintln!(
            "{} {} ({})",
            "Using cache store".cyan(),
            config.resolved_cache_store()?.display(),
            config.store_backend
        );
    }

    match cli.command {
        Commands::List => list_command(&open_cache(&config, uri.as_deref())?),
        Commands::Show { sql, key, rows } => {
            show_command(&open_cache(&config, uri.as_deref())?, sql, key, rows)
        }
        Commands::Key { sql } => key_command(&open_cache(&config, uri.as_deref())?, &sql),
        Commands::Export {
            destination,
            keys,
            queries,
        } => export_command(
            &open_cache(&config, uri.as_deref())?,
            &destination,
            &keys,
            &queries,
        ),
        Commands::Import { source } => import_command(&open_cache(&config, uri.as_deref())?, &source),
        Commands::Delete { sql, key } => {
            delete_command(&open_cache(&config, uri.as_deref())?, sql, key)
        }
        Commands::Clear => clear_command(&open_cache(&config, uri.as_deref())?),
        #[cfg(feature = "postgres")]
        Commands::Query {
            sql,
            force,
            no_cache,
            tls,
            rows,
            export_session,
        } => {
            let uri = uri.context("query requires --uri or QUERYCACHE_URI")?;
            let options = querycache_store::CacheOptions::default()
                .with_force(force)
                .with_enabled(!no_cache);
            query_command(
                &config,
                &uri,
                tls,
                &sql,
                options,
                rows,
                export_session.as_deref(),
                cli.verbose,
            )
            .await
        }
    }
}

/// Log to stderr; RUST_LOG wins over -v
fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Config file, then QUERYCACHE_* variables, then command line flags
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else if Path::new(DEFAULT_CONFIG).exists() {
        Config::from_file(Path::new(DEFAULT_CONFIG))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;

    if let Some(cache_store) = &cli.cache_store {
        config.cache_store = cache_store.clone();
    }
    if let Some(name) = &cli.name {
        config.name = Some(name.clone());
    }
    if let Some(backend) = cli.backend {
        config.store_backend = backend;
    }

    Ok(config)
}

fn namespace(config: &Config, uri: Option<&str>) -> String {
    config
        .name
        .clone()
        .or_else(|| uri.and_then(database_from_uri))
        .unwrap_or_else(|| UNNAMED_DB.to_string())
}

fn open_cache(config: &Config, uri: Option<&str>) -> Result<Cache> {
    let name = namespace(config, uri);
    tracing::debug!("Opening cache namespace '{}'", name);
    Ok(Cache::open(config, &name)?)
}

/// `@path` reads the query from a file
fn read_sql(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL from {}", path)),
        None => Ok(arg.to_string()),
    }
}

fn resolve_key(cache: &Cache, sql: Option<String>, key: Option<String>) -> Result<CacheKey> {
    match (key, sql) {
        (Some(key), _) => Ok(CacheKey::parse(&key)?),
        (None, Some(sql)) => Ok(cache.key_for(&read_sql(&sql)?)),
        (None, None) => anyhow::bail!("Either a query or --key is required"),
    }
}

fn list_command(cache: &Cache) -> Result<()> {
    let entries = cache.list()?;

    if entries.is_empty() {
        println!("No cached entries in {}", cache.root().display());
        return Ok(());
    }

    println!(
        "{} {} entries in {}",
        "Found".green(),
        entries.len(),
        cache.root().display()
    );
    println!();
    for metadata in &entries {
        println!(
            "  {}  {}  {:>10}  {:>6} x {:<3} {}",
            metadata.key.short().bold(),
            metadata.created_at.format("%Y-%m-%d %H:%M:%S"),
            metadata.duration_display(),
            metadata.num_rows,
            metadata.num_columns,
            query_summary(&metadata.raw_query, 60)
        );
    }

    Ok(())
}

fn show_command(cache: &Cache, sql: Option<String>, key: Option<String>, rows: usize) -> Result<()> {
    let key = resolve_key(cache, sql, key)?;
    let entry = cache.store().read(&key)?;

    print_metadata(&entry.metadata);
    println!();
    print!("{}", render_table(&entry.table, rows));

    Ok(())
}

fn key_command(cache: &Cache, sql: &str) -> Result<()> {
    let sql = read_sql(sql)?;
    let normalized = cache.normalize(&sql);

    println!("{}", "Normalized:".bold());
    println!("{}", normalized);
    println!();
    println!("{} {}", "Key:".bold(), cache.key_for(&sql));

    if cache.exists(&sql) {
        println!("{}", "✓ Cached".green());
    } else {
        println!("{}", "Not cached".yellow());
    }

    Ok(())
}

fn export_command(
    cache: &Cache,
    destination: &Path,
    keys: &[String],
    queries: &[String],
) -> Result<()> {
    let selection = if keys.is_empty() && queries.is_empty() {
        None
    } else {
        let mut selection = BTreeSet::new();
        for key in keys {
            selection.insert(CacheKey::parse(key)?);
        }
        for query in queries {
            selection.insert(cache.key_for(&read_sql(query)?));
        }
        Some(selection)
    };

    let summary = cache.export(destination, selection.as_ref())?;
    println!(
        "{} {} entries to {}",
        "✓ Exported".green(),
        summary.keys.len(),
        summary.path.display()
    );

    Ok(())
}

fn import_command(cache: &Cache, source: &Path) -> Result<()> {
    let summary = cache.import_cache(source)?;
    println!(
        "{} {} entries into {}",
        "✓ Imported".green(),
        summary.keys.len(),
        cache.root().display()
    );

    Ok(())
}

fn delete_command(cache: &Cache, sql: Option<String>, key: Option<String>) -> Result<()> {
    let key = resolve_key(cache, sql, key)?;

    if cache.store().delete(&key)? {
        println!("{} {}", "✓ Deleted".green(), key);
    } else {
        println!("{} {}", "No entry for".yellow(), key);
    }

    Ok(())
}

fn clear_command(cache: &Cache) -> Result<()> {
    let removed = cache.clear()?;
    println!(
        "{} {} entries from {}",
        "✓ Removed".green(),
        removed,
        cache.root().display()
    );

    Ok(())
}

#[cfg(feature = "postgres")]
#[allow(clippy::too_many_arguments)]
async fn query_command(
    config: &Config,
    uri: &str,
    tls: bool,
    sql: &str,
    options: querycache_store::CacheOptions,
    rows: usize,
    export_session: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    use querycache_engine::Database;
    use querycache_executor::PostgresExecutor;

    let sql = read_sql(sql)?;

    if verbose {
        eprintln!("{}", "Connecting to PostgreSQL...".cyan());
    }
    let executor = if tls {
        PostgresExecutor::connect_with_tls(uri).await?
    } else {
        PostgresExecutor::connect(uri).await?
    };

    let db = Database::new(executor, config)?;
    let result = db.query_with_metadata(&sql, options).await?;

    if result.was_cached {
        eprintln!(
            "{} {} (executed {}, took {})",
            "Loaded from cache".green(),
            result.key().short(),
            result.metadata.created_at.to_rfc3339(),
            result.metadata.duration_display()
        );
    } else {
        eprintln!(
            "{} {}",
            "Executed in".cyan(),
            result.metadata.duration_display()
        );
    }
    print!("{}", render_table(&result.table, rows));

    if let Some(destination) = export_session {
        let summary = db.export_session(destination)?;
        eprintln!(
            "{} {} entries to {}",
            "✓ Exported".green(),
            summary.keys.len(),
            summary.path.display()
        );
    }

    Ok(())
}

fn print_metadata(metadata: &EntryMetadata) {
    println!("{}", "=".repeat(60).bright_blue());
    println!("{} {}", "Entry".bold().bright_blue(), metadata.key);
    println!("{}", "=".repeat(60).bright_blue());
    println!();
    println!("Database:   {}", metadata.db_name);
    println!("Created:    {}", metadata.created_at.to_rfc3339());
    println!("Duration:   {}", metadata.duration_display());
    println!("Codec:      {} ({})", metadata.codec, metadata.data_file);
    println!("Shape:      {} rows x {} columns", metadata.num_rows, metadata.num_columns);
    println!();
    println!("{}", "Query:".bold());
    println!("{}", metadata.raw_query.trim());
    if metadata.normalized_query != metadata.raw_query {
        println!();
        println!("{}", "Normalized:".bold());
        println!("{}", metadata.normalized_query);
    }
}

/// First line of a query, cut to `max` characters
fn query_summary(sql: &str, max: usize) -> String {
    let line = sql.trim().lines().next().unwrap_or_default();
    let mut summary: String = line.chars().take(max).collect();
    if line.chars().count() > max || sql.trim().lines().count() > 1 {
        summary.push_str("...");
    }
    summary
}

/// Plain text grid of the first `limit` rows
fn render_table(table: &Table, limit: usize) -> String {
    let shown = table.num_rows().min(limit);
    let cells: Vec<Vec<String>> = (0..shown)
        .filter_map(|i| table.row(i))
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();

    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(column.name.chars().count()))
                .max()
                .unwrap_or_default()
        })
        .collect();

    let mut out = String::new();
    out.push_str(&format_row(&table.column_names(), &widths));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &cells {
        out.push_str(&format_row(
            &row.iter().map(String::as_str).collect::<Vec<_>>(),
            &widths,
        ));
        out.push('\n');
    }
    if table.num_rows() > shown {
        out.push_str(&format!("... {} more rows\n", table.num_rows() - shown));
    }
    out
}

fn format_row(values: &[&str], widths: &[usize]) -> String {
    values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{:<width$}", value, width = width))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}
