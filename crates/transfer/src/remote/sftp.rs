//! SFTP remote.
//!
//! Built on `ssh2` (libssh2). Every libssh2 call blocks, so each operation is
//! shipped to the blocking thread pool together with cheap clones of the
//! session handles.
//!
//! # Credentials
//!
//! Only public-key authentication is supported, and the server's host key must
//! already be present in the configured `known_hosts` file. Unknown or
//! mismatching host keys are rejected, never learned.

use crate::error::{ErrorKind, Result};
use crate::remote::{BoxSyncRead, Connection, Connector};
use crate::{RemoteFileRef, validate_name};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use ssh2::{CheckResult, KnownHostFileKind, Session, Sftp};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::UtcDateTime;
use tokio::task::spawn_blocking;

/// Connection settings for an SFTP server.
#[derive(Debug, Clone)]
pub struct SftpOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key: PathBuf,
    pub known_hosts: PathBuf,
    /// Applied to the TCP connect and to every blocking libssh2 call.
    pub timeout: Duration,
}

/// Connector that opens one SSH session (with one SFTP channel) per connection.
#[derive(Debug, Clone)]
pub struct SftpConnector {
    name: String,
    options: Arc<SftpOptions>,
}
impl SftpConnector {
    pub fn new(name: impl Into<String>, options: SftpOptions) -> Self {
        Self {
            name: name.into(),
            options: Arc::new(options),
        }
    }

    fn handshake(options: &SftpOptions) -> Result<(Session, Sftp)> {
        let address = (options.host.as_str(), options.port);
        let socket = std::net::ToSocketAddrs::to_socket_addrs(&address)
            .or_raise(|| ErrorKind::Network(format!("cannot resolve {}", options.host)))?
            .next()
            .ok_or_raise(|| ErrorKind::Network(format!("no address for {}", options.host)))?;
        let tcp = TcpStream::connect_timeout(&socket, options.timeout)
            .or_raise(|| ErrorKind::Network(format!("cannot connect to {socket}")))?;

        let mut session = Session::new().or_raise(|| ErrorKind::BackendError("cannot create SSH session".into()))?;
        session.set_timeout(u32::try_from(options.timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().or_raise(|| ErrorKind::Network(format!("SSH handshake with {socket} failed")))?;

        Self::verify_host_key(&session, options)?;

        session
            .userauth_pubkey_file(&options.username, None, &options.private_key, None)
            .or_raise(|| ErrorKind::Authentication(format!("public key rejected for {}", options.username)))?;
        if !session.authenticated() {
            exn::bail!(ErrorKind::Authentication(format!("{} is not authenticated", options.username)));
        }
        let sftp = session.sftp().or_raise(|| ErrorKind::BackendError("cannot open SFTP channel".into()))?;
        Ok((session, sftp))
    }

    fn verify_host_key(session: &Session, options: &SftpOptions) -> Result<()> {
        let mut known_hosts =
            session.known_hosts().or_raise(|| ErrorKind::BackendError("cannot initialise known hosts".into()))?;
        known_hosts
            .read_file(&options.known_hosts, KnownHostFileKind::OpenSSH)
            .or_raise(|| ErrorKind::InvalidPath(options.known_hosts.clone()))?;
        let (key, _) =
            session.host_key().ok_or_raise(|| ErrorKind::Authentication("server sent no host key".into()))?;
        match known_hosts.check_port(&options.host, options.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound => {
                exn::bail!(ErrorKind::Authentication(format!("host key for {} is not known", options.host)))
            },
            CheckResult::Mismatch => {
                exn::bail!(ErrorKind::Authentication(format!("host key for {} does not match", options.host)))
            },
            CheckResult::Failure => exn::bail!(ErrorKind::Authentication("host key check failed".into())),
        }
    }
}

#[async_trait]
impl Connector for SftpConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let options = Arc::clone(&self.options);
        let (session, sftp) = spawn_blocking(move || Self::handshake(&options))
            .await
            .or_raise(|| ErrorKind::BackendError("SSH handshake task panicked".into()))??;
        tracing::debug!(connector = %self.name, host = %self.options.host, "Opened SFTP session");
        Ok(Box::new(SftpConnection {
            _session: session,
            sftp: Arc::new(sftp),
        }))
    }
}

struct SftpConnection {
    // Keeps the transport alive for as long as the channel is in use.
    _session: Session,
    sftp: Arc<Sftp>,
}
impl SftpConnection {
    async fn blocking<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T> + Send + 'static,
    {
        let sftp = Arc::clone(&self.sftp);
        spawn_blocking(move || operation(&sftp))
            .await
            .or_raise(|| ErrorKind::BackendError("SFTP task panicked".into()))?
    }
}

#[async_trait]
impl Connection for SftpConnection {
    async fn ping(&mut self) -> Result<()> {
        self.blocking(|sftp| {
            sftp.realpath(Path::new(".")).or_raise(|| ErrorKind::Network("SFTP session is not responding".into()))?;
            Ok(())
        })
        .await
    }

    async fn list(&mut self, directory: &Path) -> Result<Vec<RemoteFileRef>> {
        let directory = directory.to_path_buf();
        self.blocking(move |sftp| {
            let entries = sftp.readdir(&directory).or_raise(|| ErrorKind::NotFound(directory.clone()))?;
            let mut files = Vec::with_capacity(entries.len());
            for (path, stat) in entries {
                if !stat.is_file() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if validate_name(name).is_err() {
                    tracing::warn!(name, "Skipping remote file with invalid name");
                    continue;
                }
                let seconds = i64::try_from(stat.mtime.unwrap_or(0)).unwrap_or(i64::MAX);
                let modified = UtcDateTime::from_unix_timestamp(seconds)
                    .or_raise(|| ErrorKind::BackendError(format!("invalid mtime for {name}")))?;
                files.push(RemoteFileRef::new(&directory, name, stat.size.unwrap_or(0), modified));
            }
            files.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(files)
        })
        .await
    }

    async fn open(&mut self, file: &RemoteFileRef) -> Result<BoxSyncRead> {
        validate_name(&file.name)?;
        let path = file.path();
        self.blocking(move |sftp| {
            let handle = sftp.open(&path).or_raise(|| ErrorKind::NotFound(path.clone()))?;
            Ok(Box::new(handle) as BoxSyncRead)
        })
        .await
    }
}
