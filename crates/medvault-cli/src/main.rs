//! medvault: client-side vault CLI
//!
//! Commands:
//!   login                       - derive login keys, print the auth key hash
//!   encrypt <file> [--zero-knowledge]
//!                               - encrypt into <out> plus <out>.meta.json
//!   decrypt <blob> [<out>]      - decrypt a blob using its .meta.json form
//!   inspect <blob>              - print the envelope header
//!   config show                 - display current configuration
//!
//! Passwords are read from MEDVAULT_PASSWORD / MEDVAULT_FILE_PASSWORD or
//! prompted for on the terminal. They are never accepted as arguments.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use tracing::info;

use medvault_core::config::MedvaultConfig;
use medvault_crypto::{
    AuthContext, Credential, CryptoError, EncryptedStructure, EncryptionMode, FileCrypto,
    KeyManager, PlainFile, Salt, UploadForm,
};

const PASSWORD_ENV: &str = "MEDVAULT_PASSWORD";
const FILE_PASSWORD_ENV: &str = "MEDVAULT_FILE_PASSWORD";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "medvault",
    version,
    about = "MedVault zero-knowledge file vault client",
    long_about = "medvault: derive vault keys and encrypt or decrypt medical documents locally"
)]
struct Cli {
    /// Path to medvault.toml configuration file
    #[arg(long, short = 'c', env = "MEDVAULT_CONFIG", default_value = "medvault.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "MEDVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "MEDVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive the session keys for an account and print the auth key hash
    Login {
        #[command(flatten)]
        account: AccountArgs,
    },

    /// Encrypt a file into an upload blob and its form metadata
    Encrypt {
        /// Plaintext input file
        input: PathBuf,
        /// Output blob path (default: <input>.enc)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// MIME type recorded in the form
        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,
        /// Protect with a per-file password instead of the account key
        #[arg(long)]
        zero_knowledge: bool,
        #[command(flatten)]
        account: AccountArgs,
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Decrypt a blob written by `encrypt`
    Decrypt {
        /// Encrypted blob
        blob: PathBuf,
        /// Output directory or file (default: current dir + original name)
        out: Option<PathBuf>,
        /// Form metadata (default: <blob>.meta.json)
        #[arg(long)]
        meta: Option<PathBuf>,
        #[command(flatten)]
        account: AccountArgs,
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Print the envelope header of a blob
    Inspect {
        blob: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

/// Account identity for commands that need the session master key.
#[derive(Args, Debug)]
struct AccountArgs {
    /// Account identity (email)
    #[arg(long, env = "MEDVAULT_IDENTITY")]
    identity: Option<String>,
    /// Base64 vault salt issued by the auth backend
    #[arg(long, env = "MEDVAULT_VAULT_SALT")]
    vault_salt: Option<String>,
}

/// Optional record binding carried as associated data.
#[derive(Args, Debug)]
struct ContextArgs {
    /// User id bound into the envelope
    #[arg(long, requires_all = ["record", "kind"])]
    user: Option<String>,
    /// Medical record id
    #[arg(long, requires_all = ["user", "kind"])]
    record: Option<String>,
    /// Record kind (e.g. lab_result)
    #[arg(long, requires_all = ["user", "record"])]
    kind: Option<String>,
}

impl ContextArgs {
    fn build(&self) -> Result<Option<AuthContext>> {
        match (&self.user, &self.record, &self.kind) {
            (Some(user), Some(record), Some(kind)) => Ok(Some(
                AuthContext::new(user.as_str(), record.as_str(), kind.as_str())
                    .context("invalid record context")?,
            )),
            _ => Ok(None),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MedvaultConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None if config.logging.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);

    match cli.command {
        Commands::Login { account } => cmd_login(&config, &account).await,
        Commands::Encrypt {
            input,
            out,
            mime_type,
            zero_knowledge,
            account,
            context,
        } => {
            cmd_encrypt(
                &config,
                &input,
                out.as_deref(),
                &mime_type,
                zero_knowledge,
                &account,
                &context,
            )
            .await
        }
        Commands::Decrypt {
            blob,
            out,
            meta,
            account,
            context,
        } => cmd_decrypt(&config, &blob, out.as_deref(), meta.as_deref(), &account, &context).await,
        Commands::Inspect { blob } => cmd_inspect(&blob),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

/// Install the global subscriber. Logs go to stderr; stdout carries command
/// output.
fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = matches!(format, LogFormat::Json);

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

// ── Secrets ───────────────────────────────────────────────────────────────────

/// Read a secret from `env_var`, or prompt for it on the terminal.
fn read_secret(env_var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(SecretString::from(value));
    }
    let value = rpassword::prompt_password(prompt).context("reading password from terminal")?;
    Ok(SecretString::from(value))
}

/// Build a ready pipeline, unlocking the session when the command needs the
/// account key.
async fn open_vault(
    config: &MedvaultConfig,
    account: &AccountArgs,
    unlock: bool,
) -> Result<FileCrypto> {
    let crypto = FileCrypto::init(&config.crypto, KeyManager::from_config(&config.session))
        .await
        .context("initializing crypto backend")?;
    if unlock {
        let (credential, salt) = account_credential(account)?;
        crypto
            .login(credential, salt)
            .await
            .context("deriving session key")?;
    }
    Ok(crypto)
}

fn account_credential(account: &AccountArgs) -> Result<(Credential, Salt)> {
    let identity = account
        .identity
        .clone()
        .context("--identity (or MEDVAULT_IDENTITY) is required")?;
    let salt = Salt::from_b64(account.vault_salt.as_deref().unwrap_or_default())
        .context("--vault-salt (or MEDVAULT_VAULT_SALT) must be a base64 salt")?;
    let password = read_secret(PASSWORD_ENV, "Account password: ")?;
    Ok((Credential { password, identity }, salt))
}

// ── `medvault login` ──────────────────────────────────────────────────────────

async fn cmd_login(config: &MedvaultConfig, account: &AccountArgs) -> Result<()> {
    let crypto = open_vault(config, account, false).await?;
    let (credential, salt) = account_credential(account)?;
    let auth_key_hash = crypto
        .login(credential, salt)
        .await
        .context("deriving login keys")?;
    crypto.logout();

    println!("auth_key_hash: {auth_key_hash}");
    Ok(())
}

// ── `medvault encrypt` ────────────────────────────────────────────────────────

async fn cmd_encrypt(
    config: &MedvaultConfig,
    input: &Path,
    out: Option<&Path>,
    mime_type: &str,
    zero_knowledge: bool,
    account: &AccountArgs,
    context: &ContextArgs,
) -> Result<()> {
    let ctx = context.build()?;
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context("input path has no file name")?;

    let crypto = open_vault(config, account, !zero_knowledge).await?;
    let mode = if zero_knowledge {
        let password = read_secret(FILE_PASSWORD_ENV, "File password: ")?;
        let confirm = read_secret(FILE_PASSWORD_ENV, "Confirm file password: ")?;
        if password.expose_secret() != confirm.expose_secret() {
            anyhow::bail!("file passwords do not match");
        }
        EncryptionMode::ZeroKnowledge { password }
    } else {
        EncryptionMode::Centralized
    };

    let file = PlainFile {
        name,
        mime_type: mime_type.to_string(),
        bytes,
    };
    let form = crypto
        .encrypt_file(&file, mode, ctx.as_ref())
        .await
        .with_context(|| format!("encrypting {}", input.display()))?;
    crypto.logout();

    let blob_path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| append_extension(input, "enc"));
    write_form(&blob_path, &form).await?;

    info!(path = %blob_path.display(), encrypted = form.is_encrypted, "wrote upload form");
    println!("  blob:    {}", blob_path.display());
    println!("  meta:    {}", meta_path(&blob_path).display());
    println!(
        "  mode:    {}",
        if form.is_encrypted { "zero-knowledge" } else { "centralized" }
    );
    println!("  bytes:   {}", form.original_size);
    Ok(())
}

// ── `medvault decrypt` ────────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &MedvaultConfig,
    blob: &Path,
    out: Option<&Path>,
    meta: Option<&Path>,
    account: &AccountArgs,
    context: &ContextArgs,
) -> Result<()> {
    let ctx = context.build()?;
    let meta = meta.map(Path::to_path_buf).unwrap_or_else(|| meta_path(blob));
    let form = read_form(blob, &meta).await?;

    let crypto = open_vault(config, account, !form.is_encrypted).await?;
    let password = std::env::var(FILE_PASSWORD_ENV).ok().map(SecretString::from);

    let file = match crypto.decrypt_file(&form, password, ctx.as_ref()).await {
        Err(CryptoError::PasswordRequired) => {
            let password = rpassword::prompt_password("File password: ")
                .context("reading password from terminal")?;
            crypto
                .decrypt_file(&form, Some(SecretString::from(password)), ctx.as_ref())
                .await
        }
        other => other,
    }
    .with_context(|| format!("decrypting {}", blob.display()))?;
    crypto.logout();

    let dest = match out {
        Some(path) if path.is_dir() => path.join(safe_file_name(&file.name)?),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(safe_file_name(&file.name)?),
    };
    tokio::fs::write(&dest, &file.bytes)
        .await
        .with_context(|| format!("writing {}", dest.display()))?;

    println!("  file:    {}", dest.display());
    println!("  type:    {}", file.mime_type);
    println!("  bytes:   {}", file.bytes.len());
    Ok(())
}

// ── `medvault inspect` ────────────────────────────────────────────────────────

fn cmd_inspect(blob: &Path) -> Result<()> {
    let data = std::fs::read(blob).with_context(|| format!("reading {}", blob.display()))?;
    let structure = EncryptedStructure::from_json(&data)
        .with_context(|| format!("parsing envelope {}", blob.display()))?;

    println!("  version:    {}", structure.version);
    println!(
        "  kdf:        {} (m={} KiB, t={}, p={})",
        structure.kdf.alg,
        structure.kdf.params.m,
        structure.kdf.params.t,
        structure.kdf.params.p
    );
    println!("  cipher:     {}", structure.encryption.alg);
    println!("  payload:    {} base64 chars", structure.data_b64.len());

    let meta = meta_path(blob);
    if meta.exists() {
        let text = std::fs::read_to_string(&meta)
            .with_context(|| format!("reading {}", meta.display()))?;
        let form: UploadForm = serde_json::from_str(&text)
            .with_context(|| format!("parsing form metadata {}", meta.display()))?;
        for (field, value) in form.text_fields() {
            println!("  {field:<18} {value}");
        }
    }
    Ok(())
}

// ── `medvault config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &MedvaultConfig, config_path: &Path) -> Result<()> {
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

// ── Form files ────────────────────────────────────────────────────────────────

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn meta_path(blob: &Path) -> PathBuf {
    append_extension(blob, "meta.json")
}

async fn write_form(blob: &Path, form: &UploadForm) -> Result<()> {
    tokio::fs::write(blob, &form.file)
        .await
        .with_context(|| format!("writing {}", blob.display()))?;
    let meta = meta_path(blob);
    let json = serde_json::to_string_pretty(form).context("serializing form metadata")?;
    tokio::fs::write(&meta, json)
        .await
        .with_context(|| format!("writing {}", meta.display()))?;
    Ok(())
}

async fn read_form(blob: &Path, meta: &Path) -> Result<UploadForm> {
    let text = tokio::fs::read_to_string(meta)
        .await
        .with_context(|| format!("reading {}", meta.display()))?;
    let mut form: UploadForm = serde_json::from_str(&text)
        .with_context(|| format!("parsing form metadata {}", meta.display()))?;
    form.file = tokio::fs::read(blob)
        .await
        .with_context(|| format!("reading {}", blob.display()))?;
    Ok(form)
}

/// Decrypted names come from the sender; keep only the final component.
fn safe_file_name(name: &str) -> Result<PathBuf> {
    Path::new(name)
        .file_name()
        .map(PathBuf::from)
        .with_context(|| format!("decrypted file name {name:?} is not usable"))
}
