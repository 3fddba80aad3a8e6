//! Identifiers shared across the relay
//!
//! - `ConnectionId`: UUID handle for one live server-side connection

use uuid::Uuid;

/// Handle identifying one accepted connection
///
/// Minted by the handler when a socket is accepted, before the handshake,
/// and never reused. Two peers may pick the same display name (or collide
/// on the `User<port>` default from different hosts), so everything that
/// must single out one connection goes through this handle instead:
///
/// - the `ConnectionRegistry` map key, so `unregister` removes exactly
///   the departing connection and reports its name at most once
/// - the `exclude` argument of `broadcast`, so a sender never receives
///   its own line while a same-named peer still does
/// - the connection field in handler log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_id_display_is_uuid() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string(), id.0.to_string());
        assert_eq!(Uuid::parse_str(&id.to_string()).unwrap(), id.0);
    }
}
