use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};
use thiserror::Error;

use crate::config::DeviceConfig;

const FTP_PORT: u16 = 21;
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const SESSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Retrieval failure classes the worker branches on.
///
/// `Absent` is non-escalating and ends up in the skip list; `Transport`
/// aborts the current session. Like the source system, everything that is
/// not clearly a connection-level failure is treated as absent, including
/// transient unknown errors (see DESIGN.md).
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("remote reports no such file: {0}")]
    Absent(String),

    #[error("transport failure retrieving {path}")]
    Transport {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Connectivity probing, session lifecycle and single-file retrieval against
/// one device's remote service.
pub trait RemoteClient: Send {
    /// Lightweight reachability check with a short timeout; no side effects.
    fn probe(&self) -> bool;

    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self);

    /// Download one remote file into memory. `path` is relative to the
    /// device's remote data root.
    fn retrieve(&mut self, path: &str) -> std::result::Result<Vec<u8>, RetrieveError>;
}

/// FTP-backed [`RemoteClient`].
pub struct FtpClient {
    host: String,
    user: String,
    password: String,
    remote_folder: String,
    buffer_size: usize,
    passive: bool,
    stream: Option<FtpStream>,
}

impl FtpClient {
    pub fn new(device: &DeviceConfig) -> Self {
        Self {
            host: device.host.clone(),
            user: device.user.clone(),
            password: device.password.clone(),
            remote_folder: device.remote_folder.clone(),
            buffer_size: device.buffer_size.max(1),
            passive: device.passive_mode,
            stream: None,
        }
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), FTP_PORT)
            .to_socket_addrs()
            .with_context(|| format!("resolve {}", self.host))?
            .next()
            .ok_or_else(|| anyhow!("no address for {}", self.host))
    }
}

impl RemoteClient for FtpClient {
    fn probe(&self) -> bool {
        let Ok(addr) = self.resolve() else {
            return false;
        };
        match TcpStream::connect_timeout(&addr, PROBE_TIMEOUT) {
            Ok(_) => {
                tracing::debug!(host = %self.host, "reachable");
                true
            }
            Err(err) => {
                tracing::warn!(host = %self.host, error = %err, "unreachable");
                false
            }
        }
    }

    fn connect(&mut self) -> Result<()> {
        let addr = self.resolve()?;
        let mut stream = FtpStream::connect_timeout(addr, SESSION_TIMEOUT)
            .with_context(|| format!("connect to {}", self.host))?;
        // Transfers past the handshake get the same bound.
        if let Err(err) = stream.get_ref().set_read_timeout(Some(SESSION_TIMEOUT)) {
            tracing::warn!(host = %self.host, error = %err, "failed to set read timeout");
        }
        if let Err(err) = stream.get_ref().set_write_timeout(Some(SESSION_TIMEOUT)) {
            tracing::warn!(host = %self.host, error = %err, "failed to set write timeout");
        }
        stream
            .login(&self.user, &self.password)
            .with_context(|| format!("login to {}", self.host))?;
        stream.set_mode(if self.passive {
            Mode::Passive
        } else {
            Mode::Active
        });
        stream
            .transfer_type(FileType::Binary)
            .context("set binary transfer type")?;
        tracing::debug!(host = %self.host, "session opened");
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.quit() {
                tracing::warn!(host = %self.host, error = %err, "disconnect error");
            } else {
                tracing::debug!(host = %self.host, "session closed");
            }
        }
    }

    fn retrieve(&mut self, path: &str) -> std::result::Result<Vec<u8>, RetrieveError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(RetrieveError::Transport {
                path: path.to_string(),
                source: anyhow!("no open session"),
            });
        };

        let remote_path = format!("/{}{}", self.remote_folder, path);
        tracing::debug!(host = %self.host, path = %remote_path, "RETR");
        let buffer_size = self.buffer_size;
        let started = Instant::now();

        let result = stream.retr(&remote_path, |reader| {
            let mut out = Vec::new();
            let mut chunk = vec![0u8; buffer_size];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => out.extend_from_slice(&chunk[..n]),
                    Err(err) => return Err(FtpError::ConnectionError(err)),
                }
            }
            Ok(out)
        });

        match result {
            Ok(data) if data.is_empty() => {
                // The device's server answers RETR for missing files with an
                // empty transfer instead of a 550.
                Err(RetrieveError::Absent(path.to_string()))
            }
            Ok(data) => {
                let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
                tracing::debug!(
                    host = %self.host,
                    bytes = data.len(),
                    kibps = format!("{:.2}", data.len() as f64 / elapsed / 1024.0),
                    "transfer complete"
                );
                Ok(data)
            }
            Err(err) => Err(classify(path, err)),
        }
    }
}

fn classify(path: &str, err: FtpError) -> RetrieveError {
    match err {
        FtpError::ConnectionError(_) => RetrieveError::Transport {
            path: path.to_string(),
            source: err.into(),
        },
        other => {
            // 550s and every other protocol-level reply land here.
            tracing::debug!(path, error = %other, "treating retrieval failure as absent");
            RetrieveError::Absent(path.to_string())
        }
    }
}
