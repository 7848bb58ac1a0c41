mod http_transport;

use std::io;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lpass_core::{AccountUpdate, Field, LpError, VaultClient};

use http_transport::HttpTransport;

const DEFAULT_SERVER: &str = "https://lastpass.com";

#[derive(Parser)]
#[command(name = "lpass", about = "Command-line client for a hosted password vault")]
struct Cli {
    /// Server base URL, overriding the default hosted endpoint.
    #[arg(long, env = "LPASS_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authenticate and cache the vault key locally.
    Login { username: String, #[arg(long)] trust: bool },
    /// Invalidate the local session.
    Logout { #[arg(long)] force: bool },
    /// Report whether a session is active.
    Status,
    /// Force a re-download of the vault.
    Sync,
    /// List accounts, optionally filtered to a group.
    Ls { group: Option<String> },
    /// Show a single account's fields.
    Show { query: String },
    /// Add a new account.
    Add {
        name: String,
        #[arg(long, default_value = "")]
        username: String,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long, default_value = "")]
        url: String,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long, default_value = "")]
        group: String,
    },
    /// Edit fields on an existing account.
    Edit {
        query: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Remove an account.
    Rm { query: String },
    /// Copy an account.
    Duplicate { query: String, new_name: Option<String> },
    /// Move an account to a different group.
    Mv { query: String, group: String },
    /// Print a random password.
    Generate { #[arg(default_value_t = 20)] length: usize },
    /// Export the vault as CSV.
    Export,
    /// Import accounts from a CSV file (or stdin when omitted).
    Import { file: Option<String>, #[arg(long)] keep_dupes: bool },
    /// Change the master password. Not supported: rotating every
    /// per-account and per-share key server-side is outside this
    /// façade's scope (spec §4.7 names no such operation).
    Passwd,
    /// Administer shared folders.
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },
}

#[derive(Subcommand)]
enum ShareAction {
    /// Create a new shared folder.
    Create { name: String },
    /// Delete a shared folder.
    Rm { share_id: String },
    /// List members of a shared folder.
    Userls { share_id: String },
    /// Invite a user to a shared folder, wrapping its key under their
    /// RSA public key (PEM, read from `public_key_file`).
    Useradd {
        share_id: String,
        username: String,
        public_key_file: String,
        #[arg(long)]
        readonly: bool,
        #[arg(long)]
        admin: bool,
        #[arg(long)]
        hide_passwords: bool,
    },
    /// Remove a user from a shared folder.
    Userdel { share_id: String, username: String },
    /// Change a member's permissions.
    Usermod {
        share_id: String,
        username: String,
        #[arg(long)]
        readonly: bool,
        #[arg(long)]
        admin: bool,
        #[arg(long)]
        hide_passwords: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("LPASS_LOG_LEVEL"))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render_error(&e));
            let code = e.downcast_ref::<LpError>().map_or(1, LpError::exit_code);
            ExitCode::from(code as u8)
        }
    }
}

/// Per spec §7: ambiguous lookups list the candidate fullnames,
/// rate-limited network errors suggest waiting.
fn render_error(e: &anyhow::Error) -> String {
    match e.downcast_ref::<LpError>() {
        Some(LpError::NotFound { message, matches }) if !matches.is_empty() => {
            format!("{message}:\n{}", matches.iter().map(|m| format!("  {m}")).collect::<Vec<_>>().join("\n"))
        }
        Some(LpError::Network { rate_limited: true, .. }) => format!("{e} (rate limited, try again shortly)"),
        _ => e.to_string(),
    }
}

fn build_client(env: lpass_core::config::Environment, server: &str) -> anyhow::Result<VaultClient> {
    let transport = HttpTransport::new(server)?;
    Ok(VaultClient::new(env, Box::new(transport)))
}

/// A cached key comes from a plaintext key file (if the user opted out
/// of the agent) or from the running agent daemon, mirroring
/// `agent.py`'s `get_decryption_key` precedence.
fn cached_vault_key(env: &lpass_core::config::Environment) -> Option<[u8; 32]> {
    if let Ok(Some(hex_bytes)) = env.read_secret_file("plaintext_key") {
        let hex_str = String::from_utf8_lossy(&hex_bytes);
        if let Ok(decoded) = hex::decode(hex_str.trim()) {
            if let Ok(key) = <[u8; 32]>::try_from(decoded.as_slice()) {
                return Some(key);
            }
        }
    }
    lpass_core::agent::request_key(&env.agent_socket_path())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let env = lpass_core::config::Environment::from_system()?;
    let candidate_key = cached_vault_key(&env);
    let mut client = build_client(env, &cli.server)?;
    if let Some(key) = candidate_key {
        let _ = client.resume_with_key(&key);
    }

    match cli.command {
        Command::Login { username, trust } => {
            let password = prompt_password("Master password: ")?;
            client.login(&username, &password, None, trust)?;
            client.sync(true)?;
            println!("Logged in as {username}.");
        }
        Command::Logout { force } => {
            client.logout(force)?;
            println!("Logged out.");
        }
        Command::Status => {
            if client.is_logged_in() {
                println!("Logged in as {}.", client.username().unwrap_or("unknown"));
            } else {
                println!("Not logged in.");
            }
        }
        Command::Sync => {
            client.sync(true)?;
            println!("Synced {} accounts.", client.accounts().len());
        }
        Command::Ls { group } => {
            client.sync(false)?;
            for account in client.accounts() {
                if group.as_deref().map_or(true, |g| account.group.eq_ignore_ascii_case(g)) {
                    println!("{}", account.fullname());
                }
            }
        }
        Command::Show { query } => {
            client.sync(false)?;
            let account = client
                .find(&query)?
                .ok_or_else(|| LpError::not_found(format!("no account matches '{query}'")))?;
            println!("{}", serde_json::to_string_pretty(&account.to_json())?);
        }
        Command::Add { name, username, password, url, notes, group } => {
            client.sync(false)?;
            let id = client.add(&name, &username, &password, &url, &notes, &group, Vec::<Field>::new(), false, None)?;
            println!("Added {name} (id {id}).");
        }
        Command::Edit { query, username, password, url, notes } => {
            client.sync(false)?;
            client.update(&query, AccountUpdate { username, password, url, notes, ..Default::default() })?;
            println!("Updated {query}.");
        }
        Command::Rm { query } => {
            client.sync(false)?;
            client.delete(&query)?;
            println!("Removed {query}.");
        }
        Command::Duplicate { query, new_name } => {
            client.sync(false)?;
            let id = client.duplicate(&query, new_name.as_deref())?;
            println!("Duplicated {query} (new id {id}).");
        }
        Command::Mv { query, group } => {
            client.sync(false)?;
            client.move_account(&query, &group)?;
            println!("Moved {query} to {group}.");
        }
        Command::Generate { length } => {
            println!("{}", generate_password(length));
        }
        Command::Export => {
            client.sync(false)?;
            print!("{}", client.export_csv()?);
        }
        Command::Import { file, keep_dupes } => {
            client.sync(false)?;
            let blob = match file {
                Some(path) => std::fs::read_to_string(path)?,
                None => {
                    let mut buf = String::new();
                    io::Read::read_to_string(&mut io::stdin(), &mut buf)?;
                    buf
                }
            };
            let ids = client.import_csv(&blob, keep_dupes)?;
            println!("Imported {} accounts.", ids.len());
        }
        Command::Passwd => {
            anyhow::bail!(
                "changing the master password is not supported by this client; \
                 do it from the vault's web console"
            );
        }
        Command::Share { action } => run_share(&mut client, action)?,
    }
    Ok(())
}

fn run_share(client: &mut VaultClient, action: ShareAction) -> anyhow::Result<()> {
    client.sync(false)?;
    match action {
        ShareAction::Create { name } => {
            let id = client.create_share(&name)?;
            println!("Created share {name} (id {id}).");
        }
        ShareAction::Rm { share_id } => {
            client.delete_share(&share_id)?;
            println!("Deleted share {share_id}.");
        }
        ShareAction::Userls { share_id } => {
            let share = client
                .list_shares()
                .iter()
                .find(|s| s.id == share_id)
                .ok_or_else(|| LpError::not_found(format!("no share with id '{share_id}'")))?;
            println!("{} ({})", share.name, share.id);
        }
        ShareAction::Useradd { share_id, username, public_key_file, readonly, admin, hide_passwords } => {
            let pem = std::fs::read_to_string(public_key_file)?;
            client.add_share_user(&share_id, &username, &pem, readonly, admin, hide_passwords)?;
            println!("Added {username} to share {share_id}.");
        }
        ShareAction::Userdel { share_id, username } => {
            client.remove_share_user(&share_id, &username)?;
            println!("Removed {username} from share {share_id}.");
        }
        ShareAction::Usermod { share_id, username, readonly, admin, hide_passwords } => {
            client.update_share_user(&share_id, &username, readonly, admin, hide_passwords)?;
            println!("Updated {username}'s permissions on share {share_id}.");
        }
    }
    Ok(())
}

fn prompt_password(label: &str) -> anyhow::Result<String> {
    Ok(rpassword::prompt_password(label)?)
}

fn generate_password(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()-_=+";
    let mut rng = rand::thread_rng();
    (0..length).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}
