//! Unix socket listener
//!
//! The socket is bound in [`init`](Listener::init) (host filesystem view)
//! and accepted on in [`listen`](Listener::listen). Each connection gets
//! its own task: read one request, hand it to the daemon, reply with the
//! result and the client pipe ends.

use async_trait::async_trait;
use std::io;
use std::os::fd::AsRawFd;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{SocketAddr, UnixListener as StdUnixListener};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncWriteExt, BufReader, Interest};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use nsexec_core::{Error, Response, Result};
use nsexec_daemon::{ConnectionHandler, Listener};

use crate::config::SocketConfig;
use crate::fd_passing::send_with_fds;

/// Listener on a filesystem-path or abstract Unix socket
#[derive(Debug)]
pub struct UnixSocketListener {
    config: SocketConfig,
    socket: Mutex<Option<StdUnixListener>>,
    shutdown: watch::Sender<bool>,
}

impl UnixSocketListener {
    /// Create a listener; nothing is bound until `init`
    #[must_use]
    pub fn new(config: SocketConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            socket: Mutex::new(None),
            shutdown,
        }
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &SocketConfig {
        &self.config
    }

    fn bind(&self) -> io::Result<StdUnixListener> {
        if let Some(name) = self.config.abstract_name() {
            let addr = SocketAddr::from_abstract_name(name)?;
            return StdUnixListener::bind_addr(&addr);
        }

        let path = &self.config.path;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        // A socket file left behind by a previous run would make bind fail.
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let socket = StdUnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.config.mode))?;
        Ok(socket)
    }

    fn remove_socket_file(&self) -> Result<()> {
        let Some(path) = self.config.fs_path() else {
            return Ok(());
        };

        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed socket file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Listener {
                message: format!("removing {}: {e}", path.display()),
            }),
        }
    }
}

/// Accept errors that leave the listening socket usable
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    ) || matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[async_trait]
impl Listener for UnixSocketListener {
    async fn init(&self) -> Result<()> {
        let mut socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        if socket.is_some() {
            return Err(Error::Listener {
                message: "listener already initialized".to_string(),
            });
        }

        let bound = self.bind().map_err(|e| Error::Listener {
            message: format!("binding {}: {e}", self.config.path.display()),
        })?;

        info!(path = %self.config.path.display(), "Socket bound");
        *socket = Some(bound);
        Ok(())
    }

    async fn listen(&self, handler: Arc<dyn ConnectionHandler>) -> Result<()> {
        let taken = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(socket) = taken else {
            if *self.shutdown.borrow() {
                debug!("Listener stopped before accepting");
                return Ok(());
            }
            return Err(Error::Listener {
                message: "listener not initialized".to_string(),
            });
        };

        socket.set_nonblocking(true)?;
        let listener = UnixListener::from_std(socket)?;
        let mut shutdown = self.shutdown.subscribe();

        info!(path = %self.config.path.display(), "Accepting connections");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("New client connection");
                        let handler = Arc::clone(&handler);
                        tokio::spawn(serve_connection(stream, handler));
                    }
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "Transient accept error");
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                    Err(e) => {
                        return Err(Error::Listener {
                            message: format!("accepting connection: {e}"),
                        });
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Listener shut down");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let already = self.shutdown.send_replace(true);

        // Drops the socket if listen never took it.
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if !already {
            info!(path = %self.config.path.display(), "Stopping listener");
        }

        self.remove_socket_file()
    }
}

/// Serve one connection: one request in, one response out
async fn serve_connection(mut stream: UnixStream, handler: Arc<dyn ConnectionHandler>) {
    let result = {
        let mut reader = BufReader::new(&mut stream);
        handler.handle(&mut reader).await
    };

    let sent = match result {
        Ok(ends) => {
            let fds = ends.as_raw_fds();
            let sent = send_response(&mut stream, &Response::success(), &fds).await;
            // The caller has its own copies now; ours close here.
            drop(ends);
            sent
        }
        Err(e) => {
            debug!(error = %e, "Request failed");
            send_response(&mut stream, &Response::failure(&e), &[]).await
        }
    };

    if let Err(e) = sent {
        warn!(error = %e, "Failed to send response");
    }
}

async fn send_response(
    stream: &mut UnixStream,
    response: &Response,
    fds: &[std::os::fd::RawFd],
) -> Result<()> {
    let payload = serde_json::to_vec(response)?;
    let raw = stream.as_raw_fd();

    let sent = stream
        .async_io(Interest::WRITABLE, || send_with_fds(raw, &payload, fds))
        .await?;

    if sent < payload.len() {
        stream.write_all(&payload[sent..]).await?;
    }
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_creates_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("daemon.sock");
        let listener = UnixSocketListener::new(SocketConfig::new().with_path(&path).with_mode(0o600));

        listener.init().await.unwrap();
        assert!(path.exists());
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        assert!(listener.init().await.is_err());

        listener.stop().await.unwrap();
        assert!(!path.exists());
        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_init_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        drop(StdUnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = UnixSocketListener::new(SocketConfig::new().with_path(&path));
        listener.init().await.unwrap();
        listener.stop().await.unwrap();
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
    }
}
