//! Asynchronous connection establishment (component C5).
//!
//! Each [`ConnectionOpener::open`] call spawns its own worker thread so a
//! slow DNS lookup or TLS handshake never blocks the pool manager's event
//! loop; the result is delivered into a shared [`crossbeam_channel`]
//! regardless of which worker finishes first.
use std::fs;
use std::io::Write;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};

use svnet_common::server::{Protocol, ProxyConfig};
use svnet_common::ServerKey;

use crate::dialer::{BoxedStream, Dialer};
use crate::error::Error;

/// The outcome of one dial attempt, delivered into the opener's shared
/// queue. `stream` is `None` on failure — the pool manager moves the
/// server into `disconnected` and never treats a dial failure as fatal.
pub struct OpenResult {
    /// The server that was dialed.
    pub server_key: ServerKey,
    /// The connected, handshaken stream, or `None` on failure.
    pub stream: Option<BoxedStream>,
    /// The raw descriptor backing `stream`, captured before any TLS
    /// wrapping erased it, for registration with the pool manager's `mio`
    /// selector.
    pub raw_fd: Option<RawFd>,
}

/// Opens connections on background threads, reporting results through a
/// shared channel.
#[derive(Clone)]
pub struct ConnectionOpener {
    cert_dir: PathBuf,
    tx: Sender<OpenResult>,
    rx: Receiver<OpenResult>,
}

impl ConnectionOpener {
    /// Construct an opener that pins TLS certificates under
    /// `<config_dir>/certs`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            cert_dir: config_dir.into().join("certs"),
            tx,
            rx,
        }
    }

    /// The receiving end of the result queue; the pool manager drains this
    /// every loop tick.
    pub fn results(&self) -> &Receiver<OpenResult> {
        &self.rx
    }

    /// Begin opening a connection to `server_key` using `proxy`. Returns
    /// immediately; the result arrives later on [`Self::results`].
    pub fn open(&self, server_key: ServerKey, proxy: Option<ProxyConfig>) {
        let tx = self.tx.clone();
        let cert_dir = self.cert_dir.clone();
        std::thread::spawn(move || {
            let outcome = dial_and_handshake(&server_key, proxy, &cert_dir);
            let (stream, raw_fd) = match outcome {
                Ok((s, fd)) => (Some(s), Some(fd)),
                Err(e) => {
                    warn!("failed to connect to {server_key}: {e}");
                    (None, None)
                }
            };
            let _ = tx.send(OpenResult {
                server_key,
                stream,
                raw_fd,
            });
        });
    }
}

fn dial_and_handshake(
    server_key: &ServerKey,
    proxy: Option<ProxyConfig>,
    cert_dir: &Path,
) -> Result<(BoxedStream, RawFd), Error> {
    let dialer = Dialer::new(proxy);
    let raw = dialer.dial(server_key)?;
    let raw_fd = raw.as_raw_fd();
    let stream = match server_key.protocol {
        Protocol::PlainTcp => {
            debug!("connected to {server_key} (plaintext)");
            raw
        }
        Protocol::Tls => handshake_tls(server_key, raw, cert_dir)?,
    };
    Ok((stream, raw_fd))
}

fn pinned_cert_path(cert_dir: &Path, host: &str) -> PathBuf {
    cert_dir.join(host)
}

fn handshake_tls(server_key: &ServerKey, raw: BoxedStream, cert_dir: &Path) -> Result<BoxedStream, Error> {
    let cert_path = pinned_cert_path(cert_dir, &server_key.host);

    if let Ok(pem) = fs::read(&cert_path) {
        let pinned = native_tls::Certificate::from_pem(&pem)?;
        let connector = native_tls::TlsConnector::builder()
            .disable_built_in_roots(true)
            .add_root_certificate(pinned)
            .build()?;
        let stream = connector
            .connect(&server_key.host, RawStreamAdapter(raw))
            .map_err(|e| Error::Tls(tls_handshake_error(e)))?;
        debug!("connected to {server_key} (tls, pinned certificate)");
        return Ok(Box::new(stream));
    }

    // Trust-on-first-use: accept whatever certificate the peer presents
    // this one time, then pin it to disk for every future connection.
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()?;
    let stream = connector
        .connect(&server_key.host, RawStreamAdapter(raw))
        .map_err(|e| Error::Tls(tls_handshake_error(e)))?;

    if let Ok(Some(cert)) = stream.peer_certificate() {
        if let Ok(der) = cert.to_der() {
            if let Err(e) = pin_certificate(cert_dir, &server_key.host, &der) {
                warn!("failed to pin certificate for {}: {}", server_key.host, e);
            }
        }
    }

    debug!("connected to {server_key} (tls, trust-on-first-use)");
    Ok(Box::new(stream))
}

fn tls_handshake_error<S>(e: native_tls::HandshakeError<S>) -> native_tls::Error {
    match e {
        native_tls::HandshakeError::Failure(err) => err,
        native_tls::HandshakeError::WouldBlock(_) => {
            // Our dialer always hands back a blocking stream, so this arm
            // is unreachable in practice; synthesize an equivalent error
            // rather than panic.
            native_tls::Error::from(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "tls handshake would block on a blocking stream",
            ))
        }
    }
}

fn pin_certificate(cert_dir: &Path, host: &str, der: &[u8]) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(cert_dir)?;
        let path = pinned_cert_path(cert_dir, host);
        let mut file = fs::File::create(&path)?;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        write_pem(&mut file, der)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(cert_dir)?;
        let path = pinned_cert_path(cert_dir, host);
        let mut file = fs::File::create(&path)?;
        write_pem(&mut file, der)
    }
}

fn write_pem(file: &mut fs::File, der: &[u8]) -> std::io::Result<()> {
    file.write_all(b"-----BEGIN CERTIFICATE-----\n")?;
    for chunk in base64::encode(der).as_bytes().chunks(64) {
        file.write_all(chunk)?;
        file.write_all(b"\n")?;
    }
    file.write_all(b"-----END CERTIFICATE-----\n")
}

/// Adapts our boxed `Read + Write + Send` trait object to a concrete type
/// `native_tls` can wrap, since `TlsConnector::connect` is generic over the
/// stream but our dialer already erased it to a trait object.
struct RawStreamAdapter(BoxedStream);

impl std::io::Read for RawStreamAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl std::io::Write for RawStreamAdapter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_cert_path_is_under_cert_dir() {
        let dir = Path::new("/tmp/svnet-certs");
        let p = pinned_cert_path(dir, "example.com");
        assert_eq!(p, dir.join("example.com"));
    }

    #[test]
    fn base64_matches_known_vector() {
        assert_eq!(base64::encode(b"Man"), "TWFu");
        assert_eq!(base64::encode(b"Ma"), "TWE=");
    }
}
