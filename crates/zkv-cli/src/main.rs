//! zkv: zkvault command-line client
//!
//! Commands:
//!   register <email>                       - create an account
//!   login <email>                          - verify a password against the stored record
//!   project create|list|rm <email> ...     - encrypted projects
//!   file put|get|list|rm <email> ...       - encrypted files
//!   config show                            - display current configuration
//!
//! The password is read from ZKV_PASSWORD if set, otherwise prompted for.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use zkv_core::config::{LogFormat, ZkvConfig};
use zkv_crypto::{ChunkMode, ChunkOptions, KdfParams, KeyManager, SessionConfig};
use zkv_storage::{build_operator, RecordStore};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "zkv",
    version,
    about = "zkvault zero-knowledge client",
    long_about = "zkv: register, log in, and keep projects and files encrypted client-side"
)]
struct Cli {
    /// Path to zkv.toml configuration file
    #[arg(long, short = 'c', env = "ZKV_CONFIG", default_value = "zkv.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, env = "ZKV_LOG")]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account and store its key record
    Register { email: String },

    /// Check a password by unlocking the stored identity key
    Login { email: String },

    /// Encrypted projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Encrypted files
    File {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// Create a project with its own key and encrypted metadata
    Create { email: String, name: String },
    /// Decrypt and list the account's projects
    List { email: String },
    /// Delete a project record (its files are kept)
    Rm { email: String, project_id: String },
}

#[derive(Subcommand, Debug)]
enum FileAction {
    /// Encrypt a local file and store it
    Put {
        email: String,
        path: PathBuf,
        /// Project the file belongs to
        #[arg(long, short = 'p')]
        project: Option<String>,
        /// MIME type to record (default: inferred from the extension)
        #[arg(long = "type", short = 't')]
        file_type: Option<String>,
    },
    /// Decrypt a stored file to a local path
    Get {
        email: String,
        file_id: String,
        out: PathBuf,
    },
    /// List the account's stored files
    List {
        email: String,
        /// Only files filed under this project
        #[arg(long, short = 'p')]
        project: Option<String>,
    },
    /// Delete a stored file
    Rm { email: String, file_id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ZkvConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    init_logging(level, config.log.format);
    debug!(config = %cli.config.display(), "zkv starting");

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Register { email } => cmd_register(&config, &email).await,
        Commands::Login { email } => cmd_login(&config, &email).await,
        Commands::Project { action: ProjectAction::Create { email, name } } => {
            cmd_project_create(&config, &email, &name).await
        }
        Commands::Project { action: ProjectAction::List { email } } => {
            cmd_project_list(&config, &email).await
        }
        Commands::Project { action: ProjectAction::Rm { email, project_id } } => {
            cmd_project_rm(&config, &email, &project_id).await
        }
        Commands::File {
            action: FileAction::Put { email, path, project, file_type },
        } => cmd_file_put(&config, &email, &path, project.as_deref(), file_type.as_deref()).await,
        Commands::File { action: FileAction::Get { email, file_id, out } } => {
            cmd_file_get(&config, &email, &file_id, &out).await
        }
        Commands::File { action: FileAction::List { email, project } } => {
            cmd_file_list(&config, &email, project.as_deref()).await
        }
        Commands::File { action: FileAction::Rm { email, file_id } } => {
            cmd_file_rm(&config, &email, &file_id).await
        }
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Session helpers ───────────────────────────────────────────────────────────

fn session_config(config: &ZkvConfig) -> SessionConfig {
    SessionConfig {
        kdf: KdfParams::with_iterations(config.crypto.kdf_iterations),
        min_password_len: config.crypto.min_password_len,
        chunks: ChunkOptions {
            chunk_size: config.crypto.chunk_size,
            mode: if config.crypto.parallel_chunks {
                ChunkMode::Parallel
            } else {
                ChunkMode::Sequential
            },
        },
    }
}

fn open_store(config: &ZkvConfig) -> Result<RecordStore> {
    let op = build_operator(&config.storage).context("building storage operator")?;
    Ok(RecordStore::new(op))
}

/// Password from ZKV_PASSWORD, or an interactive prompt.
fn read_password(confirm: bool) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("ZKV_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let password = SecretString::from(
        rpassword::prompt_password("Password: ").context("reading password")?,
    );
    if confirm {
        let again = rpassword::prompt_password("Confirm password: ")
            .context("reading password confirmation")?;
        if again != password.expose_secret() {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(password)
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Fetch the user's record and unlock a session with it.
///
/// The KDF runs on the blocking pool while a spinner ticks.
async fn authenticate(config: &ZkvConfig, store: &RecordStore, email: &str) -> Result<KeyManager> {
    let record = store
        .get_user(email)
        .await
        .with_context(|| format!("no account for {email}"))?;
    let password = read_password(false)?;

    let pb = make_spinner("login");
    pb.set_message("deriving master key...");
    let mut km = KeyManager::new(session_config(config));
    let email_owned = email.to_string();
    let (km, result) = tokio::task::spawn_blocking(move || {
        let result = km.login(&email_owned, &password, &record);
        (km, result)
    })
    .await
    .context("login task panicked")?;

    match result {
        Ok(()) => {
            pb.finish_and_clear();
            Ok(km)
        }
        Err(e) => {
            pb.finish_and_clear();
            Err(e).context("login failed")
        }
    }
}

// ── `zkv register` ────────────────────────────────────────────────────────────

async fn cmd_register(config: &ZkvConfig, email: &str) -> Result<()> {
    let store = open_store(config)?;
    let password = read_password(true)?;

    let pb = make_spinner("register");
    pb.set_message("deriving master key...");
    let mut km = KeyManager::new(session_config(config));
    let email_owned = email.to_string();
    let (mut km, result) = tokio::task::spawn_blocking(move || {
        let result = km.register(&email_owned, &password);
        (km, result)
    })
    .await
    .context("register task panicked")?;
    pb.finish_and_clear();
    let record = result.context("registration failed")?;

    store
        .put_user(&record)
        .await
        .with_context(|| format!("storing account for {email}"))?;

    info!(email, "account registered");
    println!("Registered {}", record.email);
    println!("  public key: {}", short_hex(&record.public_key));
    println!("  kdf:        PBKDF2-HMAC-SHA256, {} iterations", record.kdf.iterations);
    km.logout();
    Ok(())
}

// ── `zkv login` ───────────────────────────────────────────────────────────────

async fn cmd_login(config: &ZkvConfig, email: &str) -> Result<()> {
    let store = open_store(config)?;
    let mut km = authenticate(config, &store, email).await?;

    println!("Logged in as {email}");
    if let Some(pk) = km.public_key() {
        println!("  public key: {}", short_hex(pk));
    }
    km.logout();
    Ok(())
}

// ── `zkv project` ─────────────────────────────────────────────────────────────

async fn cmd_project_create(config: &ZkvConfig, email: &str, name: &str) -> Result<()> {
    let store = open_store(config)?;
    let mut km = authenticate(config, &store, email).await?;

    let project = km.create_project(name).context("creating project")?;
    store
        .put_project(email, &project)
        .await
        .context("storing project")?;

    println!("Created project {name}");
    println!("  id: {}", project.project_id);
    km.logout();
    Ok(())
}

async fn cmd_project_list(config: &ZkvConfig, email: &str) -> Result<()> {
    let store = open_store(config)?;
    let mut km = authenticate(config, &store, email).await?;

    let projects = store.list_projects(email).await.context("listing projects")?;
    if projects.is_empty() {
        println!("No projects.");
    }
    for project in &projects {
        let meta = km
            .open_project(project)
            .await
            .with_context(|| format!("decrypting project {}", project.project_id))?;
        println!("{}  {}  (created {})", project.project_id, meta.name, meta.created);
    }
    km.logout();
    Ok(())
}

async fn cmd_project_rm(config: &ZkvConfig, email: &str, project_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let mut km = authenticate(config, &store, email).await?;

    if !store
        .delete_project(email, project_id)
        .await
        .with_context(|| format!("deleting project {project_id}"))?
    {
        anyhow::bail!("project not found: {project_id}");
    }
    println!("Deleted project {project_id}");

    let orphans = store
        .list_project_files(email, project_id)
        .await
        .context("listing project files")?;
    if !orphans.is_empty() {
        println!("  {} file(s) still reference it; remove them with `zkv file rm`", orphans.len());
    }
    km.logout();
    Ok(())
}

// ── `zkv file` ────────────────────────────────────────────────────────────────

async fn cmd_file_put(
    config: &ZkvConfig,
    email: &str,
    path: &Path,
    project: Option<&str>,
    file_type: Option<&str>,
) -> Result<()> {
    let store = open_store(config)?;
    let mut km = authenticate(config, &store, email).await?;

    if let Some(project_id) = project {
        let record = store
            .get_project(email, project_id)
            .await
            .with_context(|| format!("looking up project {project_id}"))?;
        km.open_project(&record)
            .await
            .with_context(|| format!("opening project {project_id}"))?;
    }

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let file_type = file_type.unwrap_or_else(|| guess_file_type(path));
    let file_id = uuid::Uuid::new_v4().to_string();

    let pb = make_spinner("put");
    pb.set_message(format!("encrypting {file_name}..."));
    let record = km
        .seal_file(&file_id, project, &data, &file_name, file_type)
        .with_context(|| format!("encrypting {}", path.display()))?;
    pb.set_message("uploading...");
    store.put_file(email, &record).await.context("storing file")?;
    pb.finish_and_clear();

    println!("Stored {file_name}");
    println!("  id:     {file_id}");
    println!("  type:   {file_type}");
    println!("  size:   {}", fmt_bytes(record.file_size));
    println!("  chunks: {}", record.encrypted_file.chunks.len());
    km.logout();
    Ok(())
}

async fn cmd_file_get(config: &ZkvConfig, email: &str, file_id: &str, out: &Path) -> Result<()> {
    let store = open_store(config)?;
    let mut km = authenticate(config, &store, email).await?;

    let record = store
        .get_file(email, file_id)
        .await
        .with_context(|| format!("fetching file {file_id}"))?;
    let data = km
        .open_file(&record)
        .await
        .with_context(|| format!("decrypting file {file_id}"))?;
    tokio::fs::write(out, &data)
        .await
        .with_context(|| format!("writing {}", out.display()))?;

    println!(
        "Wrote {} ({}) to {}",
        record.file_name,
        fmt_bytes(data.len() as u64),
        out.display()
    );
    km.logout();
    Ok(())
}

async fn cmd_file_list(config: &ZkvConfig, email: &str, project: Option<&str>) -> Result<()> {
    let store = open_store(config)?;
    let files = match project {
        Some(project_id) => store.list_project_files(email, project_id).await,
        None => store.list_files(email).await,
    }
    .context("listing files")?;

    if files.is_empty() {
        println!("No files.");
    }
    for file in &files {
        let project = file.project_id.as_deref().unwrap_or("-");
        println!(
            "{}  {:>10}  {}  [{}]",
            file.file_id,
            fmt_bytes(file.file_size),
            file.file_name,
            project
        );
    }
    Ok(())
}

async fn cmd_file_rm(config: &ZkvConfig, email: &str, file_id: &str) -> Result<()> {
    let store = open_store(config)?;
    // deletion is gated on the password like every other account operation
    let mut km = authenticate(config, &store, email).await?;

    if store
        .delete_file(email, file_id)
        .await
        .with_context(|| format!("deleting file {file_id}"))?
    {
        println!("Deleted {file_id}");
    } else {
        anyhow::bail!("file not found: {file_id}");
    }
    km.logout();
    Ok(())
}

// ── `zkv config show` ─────────────────────────────────────────────────────────

fn cmd_config_show(config: &ZkvConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Formatting ────────────────────────────────────────────────────────────────

/// MIME type for common extensions; anything else is opaque bytes.
fn guess_file_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "toml" => "application/toml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn short_hex(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{hex}…")
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
