//! A remote endpoint and its liveness flags.

/// One known peer of a generation.
///
/// Addresses are kept as `host:port` strings so announce lists may name
/// hosts that only resolve at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub addr: String,
    /// Last alive-check verdict.
    pub is_on: bool,
    /// Whether a piece-stream client is currently attached to it.
    pub have_client: bool,
}

impl Peer {
    /// A freshly learned peer: assumed on, no client yet.
    pub fn new(addr: impl Into<String>) -> Self {
        Peer {
            addr: addr.into(),
            is_on: true,
            have_client: false,
        }
    }
}

/// Split a `host:port` address at the final colon, so bracketed and
/// unbracketed IPv6 hosts keep their own colons.
pub fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port = port.parse().ok()?;
    Some((host.trim_matches(['[', ']']), port))
}
