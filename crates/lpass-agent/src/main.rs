//! Daemon side of the key-cache agent (spec §5): listens on a UNIX
//! socket, hands the cached vault key back to same-user peers, and
//! exits itself after an idle period with no requests.

use std::os::unix::net::{UnixListener, UnixStream};
use std::time::{Duration, Instant};

use anyhow::Context;
use lpass_core::agent;
use lpass_core::cipher::KEY_LEN;
use lpass_core::config::Environment;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("LPASS_LOG_LEVEL"))
        .init();

    let env = Environment::from_system()?;
    if env.agent_disabled() {
        tracing::info!("agent disabled by configuration, exiting immediately");
        return Ok(());
    }

    let key = read_key_from_stdin()?;
    let socket_path = env.agent_socket_path();
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding agent socket at {}", socket_path.display()))?;
    listener.set_nonblocking(true)?;

    let timeout = Duration::from_secs(env.agent_timeout_secs());
    let mut last_activity = Instant::now();

    tracing::info!(socket = %socket_path.display(), timeout_secs = timeout.as_secs(), "agent listening");

    loop {
        if last_activity.elapsed() >= timeout {
            tracing::info!("idle timeout reached, exiting");
            break;
        }
        match listener.accept() {
            Ok((stream, _addr)) => {
                last_activity = Instant::now();
                if let Err(e) = handle_client(stream, &key) {
                    tracing::warn!(error = %e, "client request failed");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

fn handle_client(mut stream: UnixStream, key: &[u8; KEY_LEN]) -> anyhow::Result<()> {
    let Some(pid) = agent::read_pid_preamble(&mut stream) else {
        return Ok(());
    };
    let creds = agent::peer_credentials(&stream)?;
    if creds.pid != pid || !agent::is_same_user(creds) {
        tracing::warn!(?creds, requested_pid = pid, "rejecting peer, not same user");
        return Ok(());
    }
    agent::send_key(&mut stream, key)?;
    Ok(())
}

/// The spawning `lpass-cli` process writes the freshly-derived vault
/// key to our stdin and closes it; we never read it from anywhere
/// else, so the key never touches disk unencrypted.
fn read_key_from_stdin() -> anyhow::Result<[u8; KEY_LEN]> {
    use std::io::Read;
    let mut buf = [0u8; KEY_LEN];
    std::io::stdin()
        .read_exact(&mut buf)
        .context("reading vault key from stdin")?;
    Ok(buf)
}
