//! FTP drop directory access.
//!
//! The camera appliances write into a single FTP directory. [`FtpDirectory`]
//! keeps one control connection to it, runs the blocking `suppaftp` calls on
//! the blocking pool, and reconnects with exponential backoff after a
//! transport failure.

use crate::config::FtpConfig;
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;
use suppaftp::list::File as ListEntry;
use suppaftp::{FtpError, FtpStream};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that can occur while talking to the drop directory.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Could not resolve FTP address: {0}")]
    InvalidAddress(String),

    #[error("Connection to {address} failed after {attempts} attempts: {reason}")]
    ConnectFailed {
        address: String,
        attempts: u32,
        reason: String,
    },

    #[error("FTP operation failed: {0}")]
    Ftp(#[from] FtpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No such file: {0}")]
    NotFound(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("FTP worker failed: {0}")]
    Worker(String),
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_file: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_file: true,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_file: false,
        }
    }
}

/// The directory a watcher drains. Names are relative to the watched directory.
#[async_trait]
pub trait RemoteDirectory: Send {
    /// Full listing, in server order.
    async fn list(&mut self) -> Result<Vec<RemoteEntry>, RemoteError>;

    async fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, RemoteError>;

    async fn delete(&mut self, name: &str) -> Result<(), RemoteError>;

    /// Move `name` to `to`, which may be a path into another directory.
    async fn rename(&mut self, name: &str, to: &str) -> Result<(), RemoteError>;
}

/// FTP-backed [`RemoteDirectory`] with lazy reconnect.
pub struct FtpDirectory {
    config: FtpConfig,
    stream: Option<FtpStream>,
}

impl FtpDirectory {
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    /// Establish the control connection up front, with retries.
    pub async fn connect(&mut self) -> Result<(), RemoteError> {
        if self.stream.is_none() {
            self.connect_with_retry().await?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the control connection politely.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = tokio::task::spawn_blocking(move || stream.quit()).await;
            info!(address = %self.config.address, "FTP connection closed");
        }
    }

    async fn connect_with_retry(&mut self) -> Result<(), RemoteError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.reconnect_base_delay(),
            max_interval: self.config.reconnect_max_delay(),
            max_elapsed_time: None,
            ..Default::default()
        };

        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempts = 0u32;

        loop {
            let config = self.config.clone();
            let result = tokio::task::spawn_blocking(move || open_stream(&config))
                .await
                .map_err(|e| RemoteError::Worker(e.to_string()))?;

            match result {
                Ok(stream) => {
                    info!(
                        address = %self.config.address,
                        remote_dir = %self.config.remote_dir,
                        attempts = attempts,
                        "FTP connected"
                    );
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    metrics::counter!("capture.ftp.connect_failures").increment(1);

                    if max_attempts > 0 && attempts >= max_attempts {
                        error!(
                            address = %self.config.address,
                            attempts = attempts,
                            error = %e,
                            "FTP reconnect attempts exhausted"
                        );
                        return Err(RemoteError::ConnectFailed {
                            address: self.config.address.clone(),
                            attempts,
                            reason: e.to_string(),
                        });
                    }

                    if let Some(delay) = backoff.next_backoff() {
                        warn!(
                            address = %self.config.address,
                            attempt = attempts,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "FTP connection failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        backoff.reset();
                    }
                }
            }
        }
    }

    /// Run `op` against the control connection on the blocking pool.
    ///
    /// A transport-level failure drops the connection; the next call
    /// reconnects.
    async fn with_stream<T, F>(&mut self, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> Result<T, FtpError> + Send + 'static,
    {
        if self.stream.is_none() {
            self.connect_with_retry().await?;
        }
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| RemoteError::Unavailable(self.config.address.clone()))?;

        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut stream);
            (stream, result)
        })
        .await
        .map_err(|e| RemoteError::Worker(e.to_string()))?;

        match result {
            Err(FtpError::ConnectionError(e)) => {
                warn!(address = %self.config.address, error = %e, "FTP connection lost");
                Err(RemoteError::Ftp(FtpError::ConnectionError(e)))
            }
            other => {
                self.stream = Some(stream);
                other.map_err(RemoteError::from)
            }
        }
    }
}

fn open_stream(config: &FtpConfig) -> Result<FtpStream, RemoteError> {
    let addr = config
        .address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| RemoteError::InvalidAddress(config.address.clone()))?;

    let connect_timeout = config.connect_timeout();
    let operation_timeout = config.operation_timeout();

    // LIST and RETR run over passive data connections, which need the same
    // bounds as the control socket.
    let mut stream = FtpStream::connect_timeout(addr, connect_timeout)?
        .passive_stream_builder(move |data_addr| {
            open_data_stream(data_addr, connect_timeout, operation_timeout)
                .map_err(FtpError::ConnectionError)
        });
    stream.get_ref().set_read_timeout(Some(operation_timeout))?;
    stream.get_ref().set_write_timeout(Some(operation_timeout))?;
    stream.login(config.username.as_str(), config.password.as_str())?;
    stream.cwd(config.remote_dir.as_str())?;
    Ok(stream)
}

fn open_data_stream(
    addr: SocketAddr,
    connect_timeout: Duration,
    operation_timeout: Duration,
) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
    stream.set_read_timeout(Some(operation_timeout))?;
    stream.set_write_timeout(Some(operation_timeout))?;
    Ok(stream)
}

/// Parse raw LIST output, dropping lines the parser does not understand.
fn parse_listing(lines: &[String]) -> Vec<RemoteEntry> {
    lines
        .iter()
        .filter_map(|line| match ListEntry::from_str(line) {
            Ok(entry) => Some(RemoteEntry {
                name: entry.name().to_string(),
                is_file: entry.is_file(),
            }),
            Err(e) => {
                debug!(line = %line, error = %e, "Skipping unparseable LIST line");
                None
            }
        })
        .collect()
}

#[async_trait]
impl RemoteDirectory for FtpDirectory {
    async fn list(&mut self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let lines = self.with_stream(|stream| stream.list(None)).await?;
        Ok(parse_listing(&lines))
    }

    async fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, RemoteError> {
        let name = name.to_string();
        let cursor = self
            .with_stream(move |stream| stream.retr_as_buffer(&name))
            .await?;
        Ok(cursor.into_inner())
    }

    async fn delete(&mut self, name: &str) -> Result<(), RemoteError> {
        let name = name.to_string();
        self.with_stream(move |stream| stream.rm(name.as_str())).await
    }

    async fn rename(&mut self, name: &str, to: &str) -> Result<(), RemoteError> {
        let (name, to) = (name.to_string(), to.to_string());
        self.with_stream(move |stream| stream.rename(name.as_str(), to.as_str()))
            .await
    }
}
