//! Explicit dialing capability (component C5), replacing the source's
//! process-wide monkey-patched `socket` module with a value every opener
//! call takes explicitly. No process-global state: two dialers can run
//! concurrently with different proxy configurations.
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use socks::{Socks4Stream, Socks5Stream};

use svnet_common::server::{ProxyConfig, ProxyMode};
use svnet_common::ServerKey;

use crate::error::Error;

/// A connected, possibly proxied byte stream.
///
/// Bounded by `AsRawFd` (unix only, matching the pool manager's `mio`-based
/// selector) so the connection opener can hand the raw descriptor to the
/// event loop for readiness notification *before* TLS is layered on top —
/// `native_tls::TlsStream` does not forward `AsRawFd` itself, so this has
/// to be captured at the point the plain socket is still visible.
pub trait Stream: Read + Write + Send + AsRawFd {}
impl<T: Read + Write + Send + AsRawFd> Stream for T {}

/// A boxed connected stream, returned by [`Dialer::dial`] before any TLS
/// handshake is layered on top.
pub type BoxedStream = Box<dyn Stream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Establishes a raw byte stream to a `ServerKey`'s `(host, port)`,
/// optionally through a SOCKS4/SOCKS5/HTTP-CONNECT proxy.
///
/// TLS is layered separately by the connection opener, since it needs the
/// `ServerKey` to look up the pinned certificate; the dialer only ever
/// hands back plaintext framing.
#[derive(Debug, Clone)]
pub struct Dialer {
    proxy: Option<ProxyConfig>,
}

impl Dialer {
    /// Construct a dialer using `proxy`, or a direct dialer when `None`.
    pub fn new(proxy: Option<ProxyConfig>) -> Self {
        Self { proxy }
    }

    /// A dialer that never proxies.
    pub fn direct() -> Self {
        Self { proxy: None }
    }

    /// Open a raw connection to `target`.
    pub fn dial(&self, target: &ServerKey) -> Result<BoxedStream, Error> {
        match &self.proxy {
            None => dial_direct(&target.host, target.port),
            Some(proxy) => match proxy.mode {
                ProxyMode::Socks4 => dial_socks4(proxy, &target.host, target.port),
                ProxyMode::Socks5 => dial_socks5(proxy, &target.host, target.port),
                ProxyMode::Http => dial_http_connect(proxy, &target.host, target.port),
            },
        }
    }
}

fn dial_direct(host: &str, port: u16) -> Result<BoxedStream, Error> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotFound, "no address resolved")))?;
    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.set_nodelay(true).ok();
    Ok(Box::new(stream))
}

fn dial_socks4(proxy: &ProxyConfig, host: &str, port: u16) -> Result<BoxedStream, Error> {
    let proxy_addr = (proxy.host.as_str(), proxy.port);
    let user = proxy.user.as_deref().unwrap_or("");
    let stream = Socks4Stream::connect(proxy_addr, (host, port), user)
        .map_err(|e| Error::Proxy(e.to_string()))?;
    // Unwrap to the plain socket so the stream we hand back still
    // implements `AsRawFd` for the event loop's selector; the SOCKS
    // handshake itself is already complete at this point.
    Ok(Box::new(stream.into_inner()))
}

fn dial_socks5(proxy: &ProxyConfig, host: &str, port: u16) -> Result<BoxedStream, Error> {
    let proxy_addr = (proxy.host.as_str(), proxy.port);
    let stream = match (&proxy.user, &proxy.password) {
        (Some(user), Some(pass)) => {
            Socks5Stream::connect_with_password(proxy_addr, (host, port), user, pass)
        }
        _ => Socks5Stream::connect(proxy_addr, (host, port)),
    }
    .map_err(|e| Error::Proxy(e.to_string()))?;
    Ok(Box::new(stream.into_inner()))
}

fn dial_http_connect(proxy: &ProxyConfig, host: &str, port: u16) -> Result<BoxedStream, Error> {
    let mut stream = dial_direct(&proxy.host, proxy.port)?;
    let mut request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n"
    );
    if let (Some(user), Some(pass)) = (&proxy.user, &proxy.password) {
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            base64::encode(format!("{user}:{pass}"))
        ));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes())?;

    let mut response = Vec::new();
    let mut buf = [0u8; 1];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(Error::HttpConnect("connection closed before headers completed".into()));
        }
        response.push(buf[0]);
        if response.ends_with(b"\r\n\r\n") {
            break;
        }
        if response.len() > 8192 {
            return Err(Error::HttpConnect("proxy response too large".into()));
        }
    }
    let status_line = String::from_utf8_lossy(&response);
    let status_line = status_line.lines().next().unwrap_or_default();
    if !status_line.contains(" 200 ") {
        return Err(Error::HttpConnect(status_line.to_string()));
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    #[test]
    fn basic_auth_matches_known_vector() {
        assert_eq!(
            base64::encode("Aladdin:open sesame"),
            "QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }
}
