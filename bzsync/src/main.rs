use anyhow::{bail, Context, Result};
use bzsync::decode::parse_form_time;
use bzsync::storage::sqlite::SqliteCache;
use bzsync::{Bug, Changes, Client, Format, Settings};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "bzsync")]
#[command(about = "bzsync - read and update Bugzilla bugs through the web interface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: ./bzsync.toml, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and show a bug
    Show {
        /// Bug ID
        id: u64,
    },

    /// Update a bug through its edit form
    Update(UpdateArgs),

    /// Download an attachment
    Attachment {
        /// Attachment ID
        id: u64,

        /// Output file (default: the filename sent by the server)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode a saved XML or JSON export without contacting the server
    Decode {
        /// Export file
        file: PathBuf,

        /// Input format (xml|json, default: from the file extension)
        #[arg(short, long)]
        format: Option<Format>,
    },

    /// Inspect the local bug cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached bug IDs
    List,

    /// Print a cached bug
    Show {
        /// Bug ID
        id: u64,
    },
}

#[derive(clap::Args)]
struct UpdateArgs {
    /// Bug ID
    id: u64,

    /// Add a comment
    #[arg(long)]
    comment: Option<String>,

    /// Make the comment private
    #[arg(long, requires = "comment")]
    private: bool,

    /// Request information from this email
    #[arg(long, value_name = "EMAIL")]
    needinfo: Option<String>,

    /// Clear the needinfo requested from this email
    #[arg(long, value_name = "EMAIL")]
    remove_needinfo: Option<String>,

    /// Clear the outstanding needinfo request
    #[arg(long)]
    clear_needinfo: bool,

    /// With --clear-needinfo, clear every outstanding request
    #[arg(long, requires = "clear_needinfo")]
    all: bool,

    /// Set the URL field
    #[arg(long)]
    url: Option<String>,

    /// Assign to this email
    #[arg(long, value_name = "EMAIL")]
    assignee: Option<String>,

    /// Priority (P0-P5)
    #[arg(long)]
    priority: Option<String>,

    /// Set the summary
    #[arg(long)]
    summary: Option<String>,

    /// Set the status whiteboard
    #[arg(long)]
    whiteboard: Option<String>,

    /// Set the status
    #[arg(long)]
    status: Option<String>,

    /// Set the resolution
    #[arg(long)]
    resolution: Option<String>,

    /// Mark as duplicate of this bug
    #[arg(long, value_name = "ID")]
    duplicate_of: Option<u64>,

    /// Add an email to the CC list
    #[arg(long, value_name = "EMAIL")]
    add_cc: Option<String>,

    /// Remove an email from the CC list
    #[arg(long, value_name = "EMAIL")]
    remove_cc: Option<String>,

    /// Add yourself to the CC list
    #[arg(long)]
    cc_me: bool,

    /// Refuse the update if the bug changed after this instant
    #[arg(long, value_name = "TIMESTAMP", value_parser = parse_delta_ts)]
    delta_ts: Option<DateTime<Utc>>,
}

impl UpdateArgs {
    fn changes(&self) -> Changes {
        Changes {
            set_needinfo: self.needinfo.clone(),
            remove_needinfo: self.remove_needinfo.clone(),
            clear_needinfo: self.clear_needinfo,
            clear_all_needinfos: self.all,
            add_comment: self.comment.clone(),
            comment_is_private: self.private,
            set_url: self.url.clone(),
            set_assignee: self.assignee.clone(),
            set_priority: self.priority.clone(),
            set_description: self.summary.clone(),
            set_whiteboard: self.whiteboard.clone(),
            set_status: self.status.clone(),
            set_resolution: self.resolution.clone(),
            set_duplicate: self.duplicate_of,
            add_cc: self.add_cc.clone(),
            remove_cc: self.remove_cc.clone(),
            cc_myself: self.cc_me,
            delta_ts: self.delta_ts,
            check_delta_ts: self.delta_ts.is_some(),
        }
    }
}

// RFC 3339, or the form's own `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_delta_ts(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    parse_form_time(value).map_err(|e| format!("invalid timestamp {:?}: {}", value, e))
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Show { id } => {
            let client = open_client(cli.config.as_deref())?;
            let bug = client
                .get_bug(*id)
                .with_context(|| format!("Failed to fetch bug {}", id))?;
            print_bug(&bug, cli.json)
        }
        Commands::Update(args) => {
            let changes = args.changes();
            if changes.is_empty() {
                bail!("Nothing to update. Use --help for the available changes.");
            }
            let client = open_client(cli.config.as_deref())?;
            if let Err(err) = client.update(args.id, &changes) {
                if let Some(hint) = err.retry_hint() {
                    eprintln!("{} {}", "hint:".yellow(), hint);
                }
                return Err(err).with_context(|| format!("Failed to update bug {}", args.id));
            }
            println!("{} Updated bug {}", "✓".green(), args.id);
            Ok(())
        }
        Commands::Attachment { id, output } => {
            let client = open_client(cli.config.as_deref())?;
            let (descriptor, mut body) = client
                .download_attachment(*id)
                .with_context(|| format!("Failed to download attachment {}", id))?;
            let path = match output {
                Some(path) => path.clone(),
                None => default_attachment_path(*id, &descriptor.filename),
            };
            let mut file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
            let written = io::copy(&mut body, &mut file).with_context(|| format!("Failed to write {:?}", path))?;
            if written != descriptor.size {
                eprintln!(
                    "{} expected {} bytes, received {}",
                    "warning:".yellow(),
                    descriptor.size,
                    written
                );
            }
            println!("{} Saved attachment {} to {}", "✓".green(), id, path.display());
            Ok(())
        }
        Commands::Decode { file, format } => {
            let format = format.unwrap_or_else(|| format_from_extension(file));
            let raw = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
            let bug = bzsync::decode(&raw, format)
                .with_context(|| format!("Failed to decode {:?} as {}", file, format))?;
            print_bug(&bug, cli.json)
        }
        Commands::Cache { command } => {
            let settings = load_settings(cli.config.as_deref())?;
            let Some(path) = settings.cache_path else {
                bail!("No cache configured. Set cache_path in bzsync.toml or BZSYNC_CACHE_PATH.");
            };
            let cache = SqliteCache::new(path)?;
            match command {
                CacheCommands::List => {
                    let keys = cache.keys()?;
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&keys)?);
                    } else if keys.is_empty() {
                        println!("Cache at {} is empty", cache.path().display());
                    } else {
                        println!("{}", format!("{}", cache.path().display()).dimmed());
                        for key in keys {
                            println!("{}", key);
                        }
                    }
                    Ok(())
                }
                CacheCommands::Show { id } => {
                    let entry = cache
                        .get(&id.to_string())?
                        .with_context(|| format!("Bug {} is not cached", id))?;
                    if cli.json {
                        println!("{}", entry.body);
                        return Ok(());
                    }
                    let bug: Bug = serde_json::from_str(&entry.body)
                        .with_context(|| format!("Cached bug {} is corrupt", id))?;
                    println!(
                        "{}",
                        format!(
                            "cached {} ({})",
                            entry.cached_at.to_rfc3339(),
                            entry.content_hash.get(..12).unwrap_or(&entry.content_hash)
                        )
                        .dimmed()
                    );
                    print_bug(&bug, false)
                }
            }
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    Settings::load(path).context("Failed to load settings (base_url is required)")
}

fn open_client(config: Option<&Path>) -> Result<Client> {
    let settings = load_settings(config)?;
    log::debug!("using {:?}", settings);
    let mut client = Client::new(&settings)?;
    if let Some(path) = &settings.cache_path {
        let cache = SqliteCache::new(path.clone())?;
        client = client.with_cache(Box::new(cache));
    }
    Ok(client)
}

fn format_from_extension(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
        _ => Format::Xml,
    }
}

// Only the final component of the server's name is trusted.
fn default_attachment_path(id: u64, filename: &str) -> PathBuf {
    match Path::new(filename).file_name() {
        Some(name) => PathBuf::from(name),
        None => PathBuf::from(format!("attachment-{}", id)),
    }
}

fn print_bug(bug: &Bug, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(bug)?);
        return Ok(());
    }

    println!("{} {}", format!("Bug {}", bug.bug_id).bold(), bug.short_desc);
    let status = if bug.resolution.is_empty() {
        bug.bug_status.clone()
    } else {
        format!("{} {}", bug.bug_status, bug.resolution)
    };
    println!("  Status:     {}", status.green());
    println!("  Priority:   {} / {}", bug.priority, bug.bug_severity);
    println!("  Product:    {} / {}", bug.product, bug.component);
    println!("  Assignee:   {}", bug.assigned_to);
    println!("  Reporter:   {}", bug.reporter);
    println!("  Modified:   {}", bug.delta_ts.to_rfc3339());
    if !bug.status_whiteboard.is_empty() {
        println!("  Whiteboard: {}", bug.status_whiteboard);
    }
    let needinfo = bug.needinfo_requestees();
    if !needinfo.is_empty() {
        println!("  Needinfo:   {}", needinfo.join(", ").yellow());
    }
    if !bug.cc.is_empty() {
        println!("  CC:         {}", bug.cc.join(", "));
    }

    for attachment in &bug.attachments {
        let obsolete = if attachment.is_obsolete { " (obsolete)" } else { "" };
        println!(
            "  {} {} {} bytes{}",
            format!("[{}]", attachment.id).cyan(),
            attachment.filename,
            attachment.size,
            obsolete.dimmed()
        );
    }

    for comment in &bug.comments {
        let private = if comment.is_private { " private" } else { "" };
        println!();
        println!(
            "{} {} {}{}",
            format!("Comment {}", comment.count).bold(),
            comment.who,
            comment.bug_when.to_rfc3339().dimmed(),
            private.red()
        );
        println!("{}", comment.text);
    }
    Ok(())
}
