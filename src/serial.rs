//! Serial-number derivation.
//!
//! The server stamps a 6-byte serial number into every secured packet,
//! derived from the hardware address of the interface serving the control
//! endpoint. Six zero bytes when no hardware address is available.

/// Derive the serial number from the named interface's hardware address.
pub fn derive_serial_number(interface: &str) -> [u8; 6] {
    if interface.is_empty() {
        return [0u8; 6];
    }
    match hardware_address(interface) {
        Some(addr) => addr,
        None => {
            tracing::debug!(interface, "no hardware address - using zero serial number");
            [0u8; 6]
        }
    }
}

#[cfg(target_os = "linux")]
fn hardware_address(interface: &str) -> Option<[u8; 6]> {
    // interface names come from config; keep path traversal out
    if !interface
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return None;
    }
    let path = format!("/sys/class/net/{interface}/address");
    let text = std::fs::read_to_string(path).ok()?;
    let mut addr = [0u8; 6];
    let mut parts = text.trim().split(':');
    for byte in &mut addr {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(addr)
}

#[cfg(not(target_os = "linux"))]
fn hardware_address(_interface: &str) -> Option<[u8; 6]> {
    None
}
