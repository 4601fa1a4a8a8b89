//! Local host name discovery for the `[host]` message prefix.

use std::env;
use std::sync::OnceLock;
use tracing::warn;

static DISCOVERED: OnceLock<String> = OnceLock::new();

/// Host name to stamp on outgoing messages.
///
/// A configured override wins. Otherwise the name is discovered once per
/// process and cached.
pub fn local_hostname(configured: Option<&str>) -> String {
    match configured {
        Some(name) => name.to_string(),
        None => DISCOVERED.get_or_init(discover).clone(),
    }
}

/// Tries, in order: `HOSTNAME`, `gethostname(2)`, then the empty string.
fn discover() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    #[cfg(unix)]
    if let Some(hostname) = system_hostname() {
        return hostname;
    }

    warn!("Could not determine local hostname, using empty prefix");
    String::new()
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes; gethostname writes at most that many.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        warn!(error = %std::io::Error::last_os_error(), "gethostname failed");
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = std::str::from_utf8(&buf[..len]).ok()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
