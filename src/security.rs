#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Stops the proxy from starting with root privileges.
///
/// Every request makes the process fetch a URL chosen by whoever is browsing
/// and may spawn `yt-dlp` on it, so both the real and the effective uid must
/// belong to a regular account. A setuid launch counts as privileged too.
pub fn ensure_unprivileged() -> Result<()> {
    if let Some(problem) = privilege_problem(Uid::current(), Uid::effective()) {
        bail!("newtube-proxy will not serve requests {problem}; start it from an unprivileged account");
    }
    Ok(())
}

fn privilege_problem(real: Uid, effective: Uid) -> Option<String> {
    match (real.is_root(), effective.is_root()) {
        (false, false) => None,
        (true, true) => Some("as root".to_string()),
        (false, true) => Some(format!("with effective uid 0 (real uid {real})")),
        (true, false) => Some(format!("launched by root (effective uid {effective})")),
    }
}
