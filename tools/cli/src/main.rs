//! LotS CLI - Command line interface for vault operations.
//!
//! This tool sets up and unlocks a vault configuration, encrypts and
//! decrypts envelopes, generates passwords and one-time codes, and moves
//! items in and out of export files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use lots_common::Error;
use lots_crypto::password::DEFAULT_PASSWORD_LENGTH;
use lots_crypto::totp::{current_code, generate_secret, provisioning_uri};
use lots_crypto::{
    generate_secure_password, hash_password, verify_password, CharsetOptions, EncryptedEnvelope,
    KdfParams, PasswordHashRecord, Salt, TotpAlgorithm, TotpConfig, TotpScheme, DEFAULT_ITERATIONS,
};
use lots_vault::{
    export_csv, export_json, import_csv, import_json, ImportResult, ObjectCodec, StorageItem,
    VaultConfig, VaultSession, CONFIG_FILENAME,
};

#[derive(Parser)]
#[command(name = "lots")]
#[command(about = "LotS - Encrypted secret vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the vault configuration file.
    #[arg(long, global = true, env = "LOTS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up a new vault configuration.
    Init {
        /// PBKDF2 iteration count.
        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: u32,

        /// Overwrite an existing configuration.
        #[arg(long)]
        force: bool,
    },

    /// Show vault configuration.
    Info,

    /// Encrypt a value into an envelope.
    Encrypt {
        /// Plaintext file (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Envelope output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Require the input to be JSON and store it compacted.
        #[arg(long)]
        json: bool,
    },

    /// Decrypt an envelope.
    Decrypt {
        /// Envelope file (default: stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Plaintext output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate random passwords.
    Generate {
        /// Password length.
        #[arg(short, long, default_value_t = DEFAULT_PASSWORD_LENGTH)]
        length: usize,

        /// Number of passwords.
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        #[arg(long)]
        no_lowercase: bool,

        #[arg(long)]
        no_uppercase: bool,

        #[arg(long)]
        no_digits: bool,

        #[arg(long)]
        no_symbols: bool,
    },

    /// Hash a password, or verify it against a stored hash.
    HashPassword {
        /// Hex hash to verify against.
        #[arg(long, requires = "salt")]
        verify: Option<String>,

        /// Hex salt (generated when hashing if omitted).
        #[arg(long)]
        salt: Option<String>,

        /// PBKDF2 iteration count.
        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: u32,
    },

    /// Show one-time codes.
    Totp {
        /// Base32 secret. Omit with --new.
        #[arg(required_unless_present = "new")]
        secret: Option<String>,

        /// Generate a new secret and print its provisioning URI.
        #[arg(long)]
        new: bool,

        /// Account name for the provisioning URI.
        #[arg(long, default_value = "user")]
        account: String,

        /// Issuer for the provisioning URI.
        #[arg(long, default_value = "LotS")]
        issuer: String,

        /// HMAC algorithm: "sha1" or "sha256".
        #[arg(short, long, default_value = "sha1")]
        algorithm: String,

        /// Digits per code.
        #[arg(short, long, default_value_t = 6)]
        digits: u32,

        /// Time step in seconds.
        #[arg(long, default_value_t = 30)]
        step: u64,

        /// Use the legacy digest scheme.
        #[arg(long, conflicts_with = "algorithm")]
        legacy: bool,

        /// Keep refreshing until Ctrl-C.
        #[arg(short, long)]
        watch: bool,
    },

    /// Export items from a JSON item file.
    Export {
        /// JSON array of items.
        #[arg(short, long)]
        input: PathBuf,

        /// Export file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Encrypt item fields (JSON only).
        #[arg(short, long)]
        encrypt: bool,
    },

    /// Import an export file into a JSON item file.
    Import {
        /// Export file.
        #[arg(short, long)]
        input: PathBuf,

        /// Item file to write (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Input format (default: from the file extension).
        #[arg(short, long, value_enum)]
        format: Option<Format>,
    },

    /// Change the master password.
    ChangePassword {
        /// Envelope files to re-encrypt in place.
        envelopes: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = resolve_config_path(cli.config)?;

    match cli.command {
        Commands::Init { iterations, force } => cmd_init(&config_path, iterations, force).await,

        Commands::Info => cmd_info(&config_path).await,

        Commands::Encrypt {
            input,
            output,
            json,
        } => cmd_encrypt(&config_path, input.as_deref(), output.as_deref(), json).await,

        Commands::Decrypt { input, output } => {
            cmd_decrypt(&config_path, input.as_deref(), output.as_deref()).await
        }

        Commands::Generate {
            length,
            count,
            no_lowercase,
            no_uppercase,
            no_digits,
            no_symbols,
        } => {
            let options = CharsetOptions::default()
                .with_lowercase(!no_lowercase)
                .with_uppercase(!no_uppercase)
                .with_digits(!no_digits)
                .with_symbols(!no_symbols);
            cmd_generate(length, count, &options)
        }

        Commands::HashPassword {
            verify,
            salt,
            iterations,
        } => cmd_hash_password(verify, salt, iterations),

        Commands::Totp {
            secret,
            new,
            account,
            issuer,
            algorithm,
            digits,
            step,
            legacy,
            watch,
        } => {
            let scheme = if legacy {
                TotpScheme::LegacyDigest
            } else {
                TotpScheme::Rfc6238(algorithm.parse::<TotpAlgorithm>()?)
            };
            let config = TotpConfig {
                step,
                digits,
                scheme,
            };
            let secret = match secret {
                Some(secret) if !new => secret,
                _ => {
                    let secret = generate_secret();
                    println!("Secret: {}", secret);
                    println!("URI:    {}", provisioning_uri(&secret, &account, &issuer));
                    secret
                }
            };
            cmd_totp(&secret, &config, watch).await
        }

        Commands::Export {
            input,
            output,
            format,
            encrypt,
        } => cmd_export(&config_path, &input, output.as_deref(), format, encrypt).await,

        Commands::Import {
            input,
            output,
            format,
        } => cmd_import(&config_path, &input, output.as_deref(), format).await,

        Commands::ChangePassword { envelopes } => {
            cmd_change_password(&config_path, &envelopes).await
        }
    }
}

/// Config path from the flag or environment, else the per-user default.
fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => {
            let dir = dirs::config_dir().context("Cannot determine the user config directory")?;
            Ok(dir.join("lots").join(CONFIG_FILENAME))
        }
    }
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

fn load_config(config_path: &Path) -> Result<VaultConfig> {
    VaultConfig::load(config_path)
        .with_context(|| format!("Failed to load vault config from {}", config_path.display()))
}

fn unlock(config: &VaultConfig, password: &str) -> Result<VaultSession> {
    let mut session = VaultSession::new();
    let unlocked = session
        .unlock(password, config)
        .context("Failed to unlock vault")?;
    if !unlocked {
        anyhow::bail!("Incorrect master password");
    }
    Ok(session)
}

/// Load the config and unlock a session with a prompted password.
fn open_session(config_path: &Path) -> Result<VaultSession> {
    let config = load_config(config_path)?;
    let password = prompt_password("Master password: ")?;
    unlock(&config, &password)
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .context("Failed to read stdin")?;
            Ok(buffer)
        }
    }
}

async fn write_output(path: Option<&Path>, data: &str) -> Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{}", data);
            Ok(())
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

async fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
        }
    }
}

/// Replace several files, committing them in the given order.
///
/// New contents are staged next to each target and the originals are copied
/// to `.bak` before anything is renamed into place. The backups are removed
/// only once every rename has succeeded.
async fn replace_files(writes: &[(PathBuf, String)]) -> Result<()> {
    let mut staged = Vec::with_capacity(writes.len());
    for (path, data) in writes {
        let tmp = sibling(path, ".new");
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            remove_all(&staged).await;
            return Err(e).with_context(|| format!("Failed to write {}", tmp.display()));
        }
        staged.push(tmp);
    }

    let mut backups = Vec::with_capacity(writes.len());
    for (path, _) in writes {
        if !path.exists() {
            continue;
        }
        let bak = sibling(path, ".bak");
        if let Err(e) = tokio::fs::copy(path, &bak).await {
            remove_all(&staged).await;
            remove_all(&backups).await;
            return Err(e).with_context(|| format!("Failed to back up {}", path.display()));
        }
        backups.push(bak);
    }

    for ((path, _), tmp) in writes.iter().zip(&staged) {
        tokio::fs::rename(tmp, path).await.with_context(|| {
            format!(
                "Failed to replace {}; previous contents are kept in the .bak files",
                path.display()
            )
        })?;
    }

    remove_all(&backups).await;
    Ok(())
}

/// Set up a new vault.
async fn cmd_init(config_path: &Path, iterations: u32, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "Vault already set up at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    let params = KdfParams::new(iterations).context("Invalid iteration count")?;

    let password = prompt_password("Choose master password: ")?;
    let confirm = prompt_password("Confirm master password: ")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    let mut session = VaultSession::new();
    let config = session
        .setup(&password, params)
        .context("Failed to set up vault")?;
    config
        .save(config_path)
        .context("Failed to save vault config")?;

    println!("Vault set up successfully!");
    println!("  Config: {}", config_path.display());
    println!("  Iterations: {}", config.master_iterations);

    Ok(())
}

/// Show vault information.
async fn cmd_info(config_path: &Path) -> Result<()> {
    info!("Reading vault config: {}", config_path.display());

    let config = VaultConfig::load(config_path).context("Failed to load vault config")?;
    let params = config.kdf_params()?;

    println!("Vault Information:");
    println!("  Config: {}", config_path.display());
    println!("  Version: {}.{}", config.version.major, config.version.minor);
    println!("  Created: {}", config.created_at);
    println!("  KDF: PBKDF2-HMAC-SHA256");
    println!("    Iterations: {}", params.iterations);
    println!("    Salt: {} bytes", config.salt()?.as_bytes().len());
    println!(
        "  Password verifier: {}",
        if config.has_verifier() { "yes" } else { "no" }
    );

    if params.is_below_default() {
        warn!(
            "Iteration count is below the default of {}; consider change-password",
            DEFAULT_ITERATIONS
        );
    }

    Ok(())
}

/// Encrypt stdin or a file into an envelope.
async fn cmd_encrypt(
    config_path: &Path,
    input: Option<&Path>,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let plaintext = Zeroizing::new(read_input(input).await?);
    let session = open_session(config_path)?;

    let envelope = if json {
        let value: serde_json::Value =
            serde_json::from_str(&plaintext).context("Input is not valid JSON")?;
        ObjectCodec::new(&session)?
            .encrypt_object(&value)
            .context("Failed to encrypt")?
    } else {
        session.encrypt(&plaintext).context("Failed to encrypt")?
    };

    write_output(output, &envelope.to_json()?).await
}

/// Decrypt an envelope to stdout or a file.
async fn cmd_decrypt(config_path: &Path, input: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let envelope =
        EncryptedEnvelope::from_json(&read_input(input).await?).context("Invalid envelope")?;
    let session = open_session(config_path)?;

    let plaintext = Zeroizing::new(session.decrypt(&envelope).context("Failed to decrypt")?);
    write_output(output, &plaintext).await
}

fn cmd_generate(length: usize, count: usize, options: &CharsetOptions) -> Result<()> {
    for _ in 0..count {
        let password = Zeroizing::new(generate_secure_password(length, options)?);
        println!("{}", password.as_str());
    }
    Ok(())
}

fn cmd_hash_password(verify: Option<String>, salt: Option<String>, iterations: u32) -> Result<()> {
    let params = KdfParams::new(iterations)?;
    let password = prompt_password("Password: ")?;

    match (verify, salt) {
        (Some(hash), Some(salt)) => {
            let record = PasswordHashRecord { hash, salt };
            if verify_password(password.as_bytes(), &record, &params)? {
                println!("Password matches.");
            } else {
                anyhow::bail!("Password does not match");
            }
        }
        (_, salt) => {
            let salt = salt.as_deref().map(Salt::from_hex).transpose()?;
            let record = hash_password(password.as_bytes(), salt.as_ref(), &params)
                .context("Failed to hash password")?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}

async fn cmd_totp(secret: &str, config: &TotpConfig, watch: bool) -> Result<()> {
    if !watch {
        let code = current_code(secret, config)?;
        println!("{} ({}s left)", code.code, code.time_left_seconds);
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let code = current_code(secret, config)?;
                print!("\r{} ({:>2}s left) ", code.code, code.time_left_seconds);
                std::io::stdout().flush()?;
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
        }
    }
}

/// Export an item file.
async fn cmd_export(
    config_path: &Path,
    input: &Path,
    output: Option<&Path>,
    format: Format,
    encrypt: bool,
) -> Result<()> {
    let data = read_input(Some(input)).await?;
    let items: Vec<StorageItem> = serde_json::from_str(&data).context("Invalid item file")?;

    let exported = match (format, encrypt) {
        (Format::Csv, true) => anyhow::bail!("CSV exports cannot be encrypted"),
        (Format::Csv, false) => export_csv(&items)?,
        (Format::Json, false) => export_json(&items, None)?,
        (Format::Json, true) => {
            let session = open_session(config_path)?;
            export_json(&items, Some(&session))?
        }
    };

    write_output(output, &exported).await?;
    info!("Exported {} items", items.len());
    Ok(())
}

/// Import an export file.
async fn cmd_import(
    config_path: &Path,
    input: &Path,
    output: Option<&Path>,
    format: Option<Format>,
) -> Result<()> {
    let data = read_input(Some(input)).await?;
    let format = format.unwrap_or_else(|| {
        match input.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Format::Csv,
            _ => Format::Json,
        }
    });

    let result: ImportResult = match format {
        Format::Csv => import_csv(&data),
        Format::Json => match import_json(&data, None) {
            Err(Error::VaultLocked) => {
                info!("Export is encrypted; unlocking vault");
                let session = open_session(config_path)?;
                import_json(&data, Some(&session))?
            }
            other => other?,
        },
    };

    for error in &result.errors {
        eprintln!("  {}", error);
    }
    println!(
        "Imported {} items, {} failed.",
        result.imported, result.failed
    );
    if !result.success {
        anyhow::bail!("Nothing was imported");
    }

    write_output(output, &serde_json::to_string_pretty(&result.items)?).await
}

/// Change the master password and re-encrypt envelope files.
async fn cmd_change_password(config_path: &Path, envelope_paths: &[PathBuf]) -> Result<()> {
    info!("Changing master password");

    let config = load_config(config_path)?;
    let mut envelopes = Vec::with_capacity(envelope_paths.len());
    for path in envelope_paths {
        let data = read_input(Some(path)).await?;
        envelopes.push(
            EncryptedEnvelope::from_json(&data)
                .with_context(|| format!("Invalid envelope in {}", path.display()))?,
        );
    }

    let old_password = prompt_password("Current master password: ")?;
    let mut session = unlock(&config, &old_password)?;
    let new_password = prompt_password("New master password: ")?;
    let confirm = prompt_password("Confirm new master password: ")?;
    if new_password != confirm {
        anyhow::bail!("New passwords do not match");
    }

    let (new_config, reencrypted) = session
        .change_password(&old_password, &new_password, &config, &envelopes)
        .context("Failed to change password")?;

    let mut writes = Vec::with_capacity(reencrypted.len() + 1);
    for (path, envelope) in envelope_paths.iter().zip(&reencrypted) {
        writes.push((path.clone(), envelope.to_json()?));
    }
    // The config goes last: until it is replaced the old password still opens
    // everything written so far.
    writes.push((config_path.to_path_buf(), new_config.to_json()?));
    replace_files(&writes)
        .await
        .context("Failed to save re-encrypted vault")?;

    println!("Password changed successfully!");
    println!("  Re-encrypted {} envelopes", reencrypted.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_appends_suffix() {
        let path = Path::new("/tmp/vault/config.json");
        assert_eq!(sibling(path, ".bak"), PathBuf::from("/tmp/vault/config.json.bak"));
    }

    #[tokio::test]
    async fn test_replace_files_commits_all() {
        let dir = tempfile::tempdir().unwrap();
        let envelope = dir.path().join("secret.enc");
        let config = dir.path().join("config.json");
        std::fs::write(&envelope, "old envelope").unwrap();
        std::fs::write(&config, "old config").unwrap();

        let writes = vec![
            (envelope.clone(), "new envelope".to_string()),
            (config.clone(), "new config".to_string()),
        ];
        replace_files(&writes).await.unwrap();

        assert_eq!(std::fs::read_to_string(&envelope).unwrap(), "new envelope");
        assert_eq!(std::fs::read_to_string(&config).unwrap(), "new config");
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["config.json", "secret.enc"]);
    }

    #[tokio::test]
    async fn test_replace_files_failure_leaves_originals() {
        let dir = tempfile::tempdir().unwrap();
        let envelope = dir.path().join("secret.enc");
        std::fs::write(&envelope, "old envelope").unwrap();
        let unwritable = dir.path().join("missing").join("config.json");

        let writes = vec![
            (envelope.clone(), "new envelope".to_string()),
            (unwritable, "new config".to_string()),
        ];
        assert!(replace_files(&writes).await.is_err());

        assert_eq!(std::fs::read_to_string(&envelope).unwrap(), "old envelope");
        assert!(!sibling(&envelope, ".new").exists());
        assert!(!sibling(&envelope, ".bak").exists());
    }
}
