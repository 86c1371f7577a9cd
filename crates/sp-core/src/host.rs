//! Host identity: human-readable name and stable machine fingerprint.
//!
//! The fingerprint correlates sessions from the same machine for crash
//! inference, so it must survive ordinary reboots. We hash the first stable
//! identifier available rather than sending it raw:
//!
//! 1. `/etc/machine-id` (Linux)
//! 2. The MAC address of the first non-loopback interface under
//!    `/sys/class/net`
//! 3. The hostname, as a last resort
//!
//! All sources funnel through SHA-256 truncated to 32 hex characters.

use sha2::{Digest, Sha256};

/// Human-readable host label.
pub fn host_name() -> Option<String> {
    hostname::get().ok().map(|h| h.to_string_lossy().to_string())
}

/// Stable hashed machine identifier, or `None` when every source fails.
///
/// Sessions registered without a fingerprint are excluded from crash
/// inference.
pub fn host_fingerprint() -> Option<String> {
    machine_identifier().map(|raw| fingerprint_of(&raw))
}

/// Hash a raw identifier into the wire fingerprint format.
pub fn fingerprint_of(raw: &str) -> String {
    let digest = Sha256::digest(raw.trim().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..32].to_string()
}

fn machine_identifier() -> Option<String> {
    if let Some(id) = read_machine_id() {
        return Some(id);
    }
    if let Some(mac) = read_stable_mac() {
        return Some(mac);
    }
    host_name()
}

fn read_machine_id() -> Option<String> {
    let content = std::fs::read_to_string("/etc/machine-id").ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// First non-loopback, non-zero MAC under `/sys/class/net`, in name order so
/// repeated calls on the same machine agree.
fn read_stable_mac() -> Option<String> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name != "lo")
        .collect();
    names.sort();

    for name in names {
        let path = format!("/sys/class/net/{name}/address");
        if let Ok(content) = std::fs::read_to_string(&path) {
            let mac = content.trim();
            if !mac.is_empty() && mac != "00:00:00:00:00:00" {
                return Some(mac.to_string());
            }
        }
    }
    None
}
