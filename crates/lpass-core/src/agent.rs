//! Key-cache agent wire protocol (spec §5), grounded on the original's
//! `agent.py`: a client connects to a UNIX-domain socket, sends its own
//! PID as 4 native-endian bytes, the server checks the peer's real
//! `SO_PEERCRED` credentials against its own uid/gid, and on a match
//! writes back the raw 32-byte vault key. Anything else closes the
//! connection silently.
//!
//! This module holds the protocol pieces both `lpass-cli` (client side)
//! and `lpass-agent` (server side, `lpass-agent/src/main.rs`) share; the
//! actual `UnixListener`/`accept` loop lives in the daemon binary.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::cipher::KEY_LEN;
use crate::error::{LpError, LpResult};

/// Peer credentials as returned by `SO_PEERCRED` (Linux) / the
/// equivalent on other UNIX platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// A same-user peer is one whose uid and gid both match ours — mirrors
/// `agent.py`'s `client_uid != os.getuid() or client_gid != os.getgid()`
/// check exactly (spec §5's "same-user peer" requirement).
pub fn is_same_user(creds: PeerCredentials) -> bool {
    let our_uid = unsafe { libc::getuid() };
    let our_gid = unsafe { libc::getgid() };
    creds.uid == our_uid && creds.gid == our_gid
}

#[cfg(target_os = "linux")]
pub fn peer_credentials(stream: &UnixStream) -> LpResult<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    let mut creds = libc::ucred { pid: 0, uid: 0, gid: 0 };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut creds as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(LpError::Config("SO_PEERCRED query failed".into()));
    }
    Ok(PeerCredentials { pid: creds.pid, uid: creds.uid, gid: creds.gid })
}

#[cfg(not(target_os = "linux"))]
pub fn peer_credentials(_stream: &UnixStream) -> LpResult<PeerCredentials> {
    Err(LpError::Config("peer credential verification is only implemented on Linux".into()))
}

/// Client side: connect to the agent's socket, send our PID, and read
/// back a 32-byte key. Any failure (socket missing, agent refuses,
/// short read) is treated as "no cached key available", matching
/// `agent.py`'s `_ask_agent` swallowing every exception into `None`.
pub fn request_key(socket_path: &std::path::Path) -> Option<[u8; KEY_LEN]> {
    let mut stream = UnixStream::connect(socket_path).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
    stream.set_write_timeout(Some(Duration::from_secs(5))).ok()?;

    let pid = std::process::id() as i32;
    stream.write_all(&pid.to_ne_bytes()).ok()?;

    let mut key = [0u8; KEY_LEN];
    stream.read_exact(&mut key).ok()?;
    Some(key)
}

/// Server side: read the 4-byte PID preamble off a freshly accepted
/// connection. Returns `None` on a short/garbled read rather than an
/// error — the caller just closes the connection (spec §5).
pub fn read_pid_preamble(stream: &mut UnixStream) -> Option<i32> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).ok()?;
    Some(i32::from_ne_bytes(buf))
}

pub fn send_key(stream: &mut UnixStream, key: &[u8; KEY_LEN]) -> std::io::Result<()> {
    stream.write_all(key)
}
