use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Non-blocking TCP accept loop shared by the RTSP and MJPEG servers.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that `stop` can terminate it promptly. Accepted streams are switched
/// back to blocking mode before being handed to `on_accept`.
pub(crate) fn accept_loop<F>(
    listener: TcpListener,
    running: Arc<AtomicBool>,
    service: &'static str,
    mut on_accept: F,
) where
    F: FnMut(TcpStream, SocketAddr),
{
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                on_accept(stream, peer);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(service, error = %e, "TCP accept error");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
    }
    tracing::debug!(service, "accept loop exited");
}

/// Bind a listener in non-blocking mode, returning it with its bound
/// address (useful when binding port 0).
pub(crate) fn bind_listener(addr: SocketAddr) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}
