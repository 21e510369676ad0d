//! Server identifier and proxy configuration codecs (C1).
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The transport a server identifier connects over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    /// Plain, unencrypted TCP.
    PlainTcp,
    /// TCP wrapped in TLS.
    Tls,
}

impl Protocol {
    /// The single-letter wire code used in serialised server strings and in
    /// `server.peers.subscribe` feature lists (`t` / `s`).
    pub fn code(self) -> &'static str {
        match self {
            Protocol::PlainTcp => "t",
            Protocol::Tls => "s",
        }
    }

    /// The default port for this protocol (`50001` / `50002`).
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::PlainTcp => 50001,
            Protocol::Tls => 50002,
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "t" | "plain-tcp" => Ok(Protocol::PlainTcp),
            "s" | "tls" => Ok(Protocol::Tls),
            _ => Err(Error::InvalidServer(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A server identifier: `(host, port, protocol)`.
///
/// Total ordering is by canonical string form (case-sensitive); every place
/// that stores a `ServerKey` must store this canonical form so that set
/// membership checks (`interfaces`, `connecting`, `disconnected`,
/// `blacklisted`) are reliable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerKey {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl ServerKey {
    /// Construct a new server key.
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.protocol)
    }
}

impl FromStr for ServerKey {
    type Err = Error;

    /// Parse `"host:port:protocol"`, splitting from the right so that IPv6
    /// literals or hostnames containing colons are handled the same way the
    /// original `str.rsplit(':', 2)` does.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, ':');
        let protocol = parts.next().ok_or_else(|| Error::InvalidServer(s.to_string()))?;
        let port = parts.next().ok_or_else(|| Error::InvalidServer(s.to_string()))?;
        let host = parts.next().ok_or_else(|| Error::InvalidServer(s.to_string()))?;
        if parts.next().is_some() {
            return Err(Error::InvalidServer(s.to_string()));
        }
        if host.is_empty() {
            return Err(Error::InvalidServer(s.to_string()));
        }
        let protocol = Protocol::from_str(protocol).map_err(|_| Error::InvalidServer(s.to_string()))?;
        let port: u16 = port.parse().map_err(|_| Error::InvalidServer(s.to_string()))?;
        Ok(ServerKey::new(host, port, protocol))
    }
}

impl serde::Serialize for ServerKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ServerKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ServerKey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A SOCKS/HTTP proxy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// SOCKS4.
    Socks4,
    /// SOCKS5.
    Socks5,
    /// HTTP CONNECT.
    Http,
}

impl ProxyMode {
    /// The default port for this proxy mode (`1080` for SOCKS, `8080` for
    /// HTTP).
    pub fn default_port(self) -> u16 {
        match self {
            ProxyMode::Socks4 | ProxyMode::Socks5 => 1080,
            ProxyMode::Http => 8080,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ProxyMode::Socks4 => "socks4",
            ProxyMode::Socks5 => "socks5",
            ProxyMode::Http => "http",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "socks4" => Some(ProxyMode::Socks4),
            "socks5" => Some(ProxyMode::Socks5),
            "http" => Some(ProxyMode::Http),
            _ => None,
        }
    }
}

/// Proxy configuration, as persisted in the `proxy` config key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy protocol.
    pub mode: ProxyMode,
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Optional username for proxy authentication.
    pub user: Option<String>,
    /// Optional password for proxy authentication.
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Parse a proxy string of the form `mode:host:port[:user[:password]]`.
    ///
    /// `"none"` (case-insensitive) means "no proxy" and returns `Ok(None)`.
    /// Any other string must parse fully; a malformed string is a
    /// `ParseError`, never a panic.
    pub fn parse(s: &str) -> Result<Option<Self>, Error> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        let parts: Vec<&str> = s.split(':').collect();
        if parts.is_empty() || parts[0].is_empty() {
            return Err(Error::InvalidProxy(s.to_string()));
        }
        let mode = ProxyMode::parse(parts[0]).ok_or_else(|| Error::InvalidProxy(s.to_string()))?;
        let host = parts.get(1).copied().unwrap_or("localhost").to_string();
        let port = match parts.get(2) {
            Some(p) => p.parse::<u16>().map_err(|_| Error::InvalidProxy(s.to_string()))?,
            None => mode.default_port(),
        };
        let user = parts.get(3).filter(|s| !s.is_empty()).map(|s| s.to_string());
        let password = parts.get(4).filter(|s| !s.is_empty()).map(|s| s.to_string());
        Ok(Some(ProxyConfig {
            mode,
            host,
            port,
            user,
            password,
        }))
    }

    /// Serialise back to `mode:host:port[:user[:password]]`.
    pub fn serialize(cfg: Option<&ProxyConfig>) -> String {
        match cfg {
            None => "none".to_string(),
            Some(p) => format!(
                "{}:{}:{}:{}:{}",
                p.mode.as_str(),
                p.host,
                p.port,
                p.user.as_deref().unwrap_or(""),
                p.password.as_deref().unwrap_or(""),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_server() {
        let s = "bitcoincash.stackwallet.com:50002:s";
        let key: ServerKey = s.parse().unwrap();
        assert_eq!(key.host, "bitcoincash.stackwallet.com");
        assert_eq!(key.port, 50002);
        assert_eq!(key.protocol, Protocol::Tls);
        assert_eq!(key.to_string(), s);
    }

    #[test]
    fn rejects_bad_protocol() {
        assert!("host:50001:x".parse::<ServerKey>().is_err());
    }

    #[test]
    fn rejects_non_integer_port() {
        assert!("host:abc:t".parse::<ServerKey>().is_err());
    }

    #[test]
    fn splits_from_the_right_for_hosts_with_colons() {
        // IPv6 literals contain colons; rsplit ensures we still find the
        // trailing port/protocol correctly.
        let key: ServerKey = "::1:50001:t".parse().unwrap();
        assert_eq!(key.host, "::1");
        assert_eq!(key.port, 50001);
    }

    #[test]
    fn none_proxy_is_case_insensitive() {
        assert_eq!(ProxyConfig::parse("None").unwrap(), None);
        assert_eq!(ProxyConfig::parse("NONE").unwrap(), None);
    }

    #[test]
    fn proxy_defaults() {
        let p = ProxyConfig::parse("socks5:example.com").unwrap().unwrap();
        assert_eq!(p.port, 1080);
        let p = ProxyConfig::parse("http:example.com").unwrap().unwrap();
        assert_eq!(p.port, 8080);
    }

    #[test]
    fn proxy_round_trip() {
        let original = "socks5:example.com:1080:alice:hunter2";
        let parsed = ProxyConfig::parse(original).unwrap();
        assert_eq!(ProxyConfig::serialize(parsed.as_ref()), original);
    }

    #[test]
    fn proxy_round_trip_none() {
        assert_eq!(ProxyConfig::serialize(None), "none");
    }
}
