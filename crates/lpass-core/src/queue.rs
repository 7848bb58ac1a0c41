//! C8: durable encrypted upload queue (spec §4.8), ported from
//! `upload_queue.py`'s state machine: `pending` (a file in `queue/`) →
//! `locked` (a sibling lock in `locks/`, created `O_CREAT|O_EXCL`) →
//! `done` (both files removed) or `failed` (moved to `failed/`).
//!
//! Per Design Note §9, an entry carries a discriminated [`Operation`]
//! rather than an opaque `endpoint + params` map, so a future wire
//! format change can still interpret an old queued entry.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cipher;
use crate::cipher::KEY_LEN;
use crate::config::Environment;
use crate::error::{LpError, LpResult};
use crate::transport::{endpoints, Transport};

pub const MAX_RETRIES: u32 = 5;
pub const FAIL_MAX_AGE_DAYS: u64 = 14;
const MAX_FILENAME_COLLISIONS: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    AddAccount { fields: BTreeMap<String, String> },
    UpdateAccount { account_id: String, fields: BTreeMap<String, String> },
    DeleteAccount { account_id: String },
    ShareMutation { share_id: String, action: String, fields: BTreeMap<String, String> },
    UploadAttachment { account_id: String, fields: BTreeMap<String, String> },
}

impl Operation {
    /// Visible to the vault client façade (C7) so it can attempt the
    /// same call directly when online, falling back to [`enqueue`] only
    /// when the direct attempt fails.
    pub(crate) fn endpoint(&self) -> &'static str {
        match self {
            Operation::AddAccount { .. } | Operation::UpdateAccount { .. } | Operation::DeleteAccount { .. } => {
                endpoints::SHOW_WEBSITE
            }
            Operation::ShareMutation { .. } => endpoints::SHARE,
            Operation::UploadAttachment { .. } => endpoints::UPLOAD_ATTACH,
        }
    }

    pub(crate) fn params(&self) -> Vec<(String, String)> {
        match self {
            Operation::AddAccount { fields } => {
                let mut p = vec![("extjs".to_string(), "1".to_string()), ("method".to_string(), "cr".to_string())];
                p.extend(fields.clone());
                p
            }
            Operation::UpdateAccount { account_id, fields } => {
                let mut p = vec![
                    ("extjs".to_string(), "1".to_string()),
                    ("method".to_string(), "save".to_string()),
                    ("aid".to_string(), account_id.clone()),
                ];
                p.extend(fields.clone());
                p
            }
            Operation::DeleteAccount { account_id } => vec![
                ("extjs".to_string(), "1".to_string()),
                ("method".to_string(), "delete".to_string()),
                ("aid".to_string(), account_id.clone()),
            ],
            Operation::ShareMutation { share_id, action, fields } => {
                let mut p = vec![(action.clone(), "1".to_string()), ("id".to_string(), share_id.clone())];
                p.extend(fields.clone());
                p
            }
            Operation::UploadAttachment { account_id, fields } => {
                let mut p = vec![("aid".to_string(), account_id.clone())];
                p.extend(fields.clone());
                p
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct QueueEntry {
    operation: Operation,
    timestamp: i64,
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn ensure_dirs(env: &Environment) -> LpResult<()> {
    for dir in [env.queue_dir(), env.queue_locks_dir(), env.queue_failed_dir()] {
        fs::create_dir_all(&dir).map_err(|e| LpError::Config(format!("cannot create {}: {e}", dir.display())))?;
    }
    Ok(())
}

/// Serialize, encrypt, and durably persist one pending mutation (spec
/// §4.8 step 1). Returns the path written.
pub fn enqueue(env: &Environment, key: &[u8; KEY_LEN], operation: Operation) -> LpResult<PathBuf> {
    ensure_dirs(env)?;
    let timestamp = now_unix();
    let entry = QueueEntry { operation, timestamp };
    let json = serde_json::to_vec(&entry).map_err(|e| LpError::Config(format!("queue entry serialize: {e}")))?;
    let encrypted = cipher::encrypt(&json, key);

    let dir = env.queue_dir();
    for serial in 0..MAX_FILENAME_COLLISIONS {
        let name = format!("{timestamp:020}{serial:05}");
        let path = dir.join(&name);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                f.write_all(&encrypted).map_err(|e| LpError::Config(format!("queue write: {e}")))?;
                set_owner_only(&path);
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(LpError::Config(format!("queue write: {e}"))),
        }
    }
    Err(LpError::Config("exhausted filename collisions enqueuing at the same timestamp".into()))
}

#[cfg(unix)]
fn set_owner_only(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) {}

fn pending_entries(env: &Environment) -> LpResult<Vec<PathBuf>> {
    let dir = env.queue_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(&dir).map_err(|e| LpError::Config(format!("queue readdir: {e}")))? {
        let entry = entry.map_err(|e| LpError::Config(format!("queue readdir: {e}")))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

/// Drain the queue: process entries one at a time in filename
/// (timestamp) order, each under its own lock, retrying transient
/// failures with exponential backoff up to [`MAX_RETRIES`] attempts
/// (spec §4.8 step 2, §8 properties 8/9). `retry_base` is the delay
/// doubled per attempt; production callers use `Duration::from_secs(1)`,
/// tests use `Duration::ZERO` to stay fast.
pub fn drain(
    env: &Environment,
    key: &[u8; KEY_LEN],
    transport: &dyn Transport,
    retry_base: Duration,
) -> LpResult<usize> {
    ensure_dirs(env)?;
    let mut processed = 0;

    for path in pending_entries(env)? {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let lock_path = env.queue_locks_dir().join(&name);

        let lock = fs::OpenOptions::new().write(true).create_new(true).open(&lock_path);
        if lock.is_err() {
            continue; // another worker already holds this entry
        }

        let outcome = process_one(&path, key, transport, retry_base);
        let _ = fs::remove_file(&lock_path);

        match outcome {
            Ok(()) => {
                let _ = fs::remove_file(&path);
                processed += 1;
            }
            Err(_) => {
                move_to_failed(env, &path, &name)?;
            }
        }
    }

    Ok(processed)
}

fn process_one(path: &Path, key: &[u8; KEY_LEN], transport: &dyn Transport, retry_base: Duration) -> LpResult<()> {
    let encrypted = fs::read(path).map_err(|e| LpError::Config(format!("queue read: {e}")))?;
    let plain = cipher::decrypt(&encrypted, key)?;
    let entry: QueueEntry =
        serde_json::from_slice(&plain).map_err(|e| LpError::Config(format!("corrupt queue entry: {e}")))?;

    let endpoint = entry.operation.endpoint();
    let params = entry.operation.params();
    let param_refs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let mut last_err = LpError::network(None, "no attempts made");
    for attempt in 1..=MAX_RETRIES {
        if attempt > 1 && !retry_base.is_zero() {
            std::thread::sleep(retry_base * 2u32.pow(attempt - 2));
        }
        match transport.post(endpoint, &param_refs) {
            Ok(resp) if resp.is_success() => return Ok(()),
            Ok(resp) if resp.is_retryable_failure() => {
                last_err = LpError::network(Some(resp.status), "transient failure, will retry");
                continue;
            }
            Ok(resp) => return Err(LpError::network(Some(resp.status), "non-retryable failure")),
            Err(e) => {
                last_err = e;
                continue;
            }
        }
    }
    Err(last_err)
}

fn move_to_failed(env: &Environment, path: &Path, name: &str) -> LpResult<()> {
    let dest = env.queue_failed_dir().join(name);
    fs::rename(path, &dest).map_err(|e| LpError::Config(format!("queue move-to-failed: {e}")))
}

/// Remove anything under `failed/` older than [`FAIL_MAX_AGE_DAYS`]
/// (spec §4.8 step 3, §8 property 9).
pub fn cleanup(env: &Environment) -> LpResult<usize> {
    let dir = env.queue_failed_dir();
    if !dir.exists() {
        return Ok(0);
    }
    let cutoff = SystemTime::now() - Duration::from_secs(FAIL_MAX_AGE_DAYS * 24 * 3600);
    let mut removed = 0;
    for entry in fs::read_dir(&dir).map_err(|e| LpError::Config(format!("failed readdir: {e}")))? {
        let entry = entry.map_err(|e| LpError::Config(format!("failed readdir: {e}")))?;
        let path = entry.path();
        let modified = entry.metadata().and_then(|m| m.modified()).unwrap_or(SystemTime::now());
        if modified < cutoff {
            fs::remove_file(&path).map_err(|e| LpError::Config(format!("failed cleanup: {e}")))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// At most one drainer per local user: a pid file whose existence and a
/// live `kill(pid, 0)` together signal liveness (spec §4.8 step 4).
/// Spawning the actual background process is left to the caller (the
/// CLI or the agent); this only tracks/queries liveness.
pub fn ensure_running(env: &Environment) -> LpResult<bool> {
    let pid_path = env.queue_pid_file();
    let Ok(contents) = fs::read_to_string(&pid_path) else {
        return Ok(false);
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return Ok(false);
    };
    Ok(process_is_alive(pid))
}

pub fn mark_running(env: &Environment) -> LpResult<()> {
    ensure_dirs(env)?;
    fs::write(env.queue_pid_file(), std::process::id().to_string())
        .map_err(|e| LpError::Config(format!("cannot write pid file: {e}")))
}

pub fn clear_running(env: &Environment) -> LpResult<()> {
    match fs::remove_file(env.queue_pid_file()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LpError::Config(format!("cannot remove pid file: {e}"))),
    }
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::ScriptedTransport;
    use crate::transport::TransportResponse;

    fn key_of(b: u8) -> [u8; KEY_LEN] {
        [b; KEY_LEN]
    }

    fn delete_op(id: &str) -> Operation {
        Operation::DeleteAccount { account_id: id.to_string() }
    }

    #[test]
    fn enqueue_then_drain_empties_the_queue_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::for_test(dir.path());
        let key = key_of(1);

        for id in ["1", "2", "3"] {
            enqueue(&env, &key, delete_op(id)).unwrap();
        }

        let transport = ScriptedTransport::new(vec![
            TransportResponse { status: 200, body: Vec::new() },
            TransportResponse { status: 200, body: Vec::new() },
            TransportResponse { status: 200, body: Vec::new() },
        ]);
        let processed = drain(&env, &key, &transport, Duration::ZERO).unwrap();
        assert_eq!(processed, 3);
        assert_eq!(pending_entries(&env).unwrap().len(), 0);

        let calls = transport.calls();
        let ids: Vec<&str> = calls
            .iter()
            .map(|(_, params)| params.iter().find(|(k, _)| k == "aid").unwrap().1.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn s6_retry_then_succeed_calls_transport_exactly_five_times() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::for_test(dir.path());
        let key = key_of(2);
        enqueue(&env, &key, delete_op("1")).unwrap();

        let transport = ScriptedTransport::new(vec![
            TransportResponse { status: 500, body: Vec::new() },
            TransportResponse { status: 500, body: Vec::new() },
            TransportResponse { status: 500, body: Vec::new() },
            TransportResponse { status: 500, body: Vec::new() },
            TransportResponse { status: 200, body: Vec::new() },
        ]);
        let processed = drain(&env, &key, &transport, Duration::ZERO).unwrap();
        assert_eq!(processed, 1);
        assert_eq!(transport.call_count(), 5);
        assert_eq!(pending_entries(&env).unwrap().len(), 0);
    }

    #[test]
    fn exhausted_retries_move_entry_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::for_test(dir.path());
        let key = key_of(3);
        enqueue(&env, &key, delete_op("1")).unwrap();

        let transport = ScriptedTransport::new(vec![
            TransportResponse { status: 500, body: Vec::new() },
            TransportResponse { status: 500, body: Vec::new() },
            TransportResponse { status: 500, body: Vec::new() },
            TransportResponse { status: 500, body: Vec::new() },
            TransportResponse { status: 500, body: Vec::new() },
        ]);
        drain(&env, &key, &transport, Duration::ZERO).unwrap();
        assert_eq!(pending_entries(&env).unwrap().len(), 0);
        let failed: Vec<_> = fs::read_dir(env.queue_failed_dir()).unwrap().collect();
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn non_retryable_4xx_fails_without_exhausting_retries() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::for_test(dir.path());
        let key = key_of(4);
        enqueue(&env, &key, delete_op("1")).unwrap();

        let transport = ScriptedTransport::new(vec![TransportResponse { status: 403, body: Vec::new() }]);
        drain(&env, &key, &transport, Duration::ZERO).unwrap();
        assert_eq!(transport.call_count(), 1);
        let failed: Vec<_> = fs::read_dir(env.queue_failed_dir()).unwrap().collect();
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn cleanup_removes_only_entries_older_than_fail_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::for_test(dir.path());
        fs::create_dir_all(env.queue_failed_dir()).unwrap();

        let old_path = env.queue_failed_dir().join("old-entry");
        fs::write(&old_path, b"x").unwrap();
        let old_time = SystemTime::now() - Duration::from_secs((FAIL_MAX_AGE_DAYS + 1) * 24 * 3600);
        filetime_set(&old_path, old_time);

        let new_path = env.queue_failed_dir().join("new-entry");
        fs::write(&new_path, b"x").unwrap();

        let removed = cleanup(&env).unwrap();
        assert_eq!(removed, 1);
        assert!(!old_path.exists());
        assert!(new_path.exists());
    }

    fn filetime_set(path: &Path, time: SystemTime) {
        let duration = time.duration_since(UNIX_EPOCH).unwrap();
        let ts = libc::timespec { tv_sec: duration.as_secs() as libc::time_t, tv_nsec: 0 };
        let times = [ts, ts];
        let cpath = std::ffi::CString::new(path.to_str().unwrap()).unwrap();
        unsafe {
            libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), 0);
        }
    }

    #[test]
    fn ensure_running_is_false_with_no_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::for_test(dir.path());
        assert!(!ensure_running(&env).unwrap());
    }

    #[test]
    fn mark_running_then_ensure_running_reflects_the_current_process() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::for_test(dir.path());
        mark_running(&env).unwrap();
        assert!(ensure_running(&env).unwrap());
        clear_running(&env).unwrap();
        assert!(!ensure_running(&env).unwrap());
    }
}
