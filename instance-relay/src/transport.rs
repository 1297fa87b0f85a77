//! Point-to-point handshake over a named local stream endpoint.
//!
//! The secondary serves exactly one line, the primary fetches it. Only one
//! server can be bound to an endpoint at a time, so when several secondaries
//! launch together the losers retry a few times and then drop their payload.

use crate::Error;
use crate::Result;
use async_io::Async;
use async_io::Timer;
use futures::executor::block_on;
use futures::future::Either;
use futures::io::AsyncBufReadExt;
use futures::io::AsyncWriteExt;
use futures::io::BufReader;
use std::future::Future;
use std::io;
use std::os::unix::net::SocketAddr;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

/// How often a client retries while the server has not bound yet, and how
/// often it checks for cancellation
const CONNECT_POLL: Duration = Duration::from_millis(50);

/// Longest endpoint name that still fits in `sockaddr_un`
const MAX_ENDPOINT_LEN: usize = 100;

pub trait HandshakeTransport: Send + Sync {
    /// Server role: binds the endpoint, waits up to `accept_timeout` for one
    /// client, writes `line` followed by a newline and closes.
    ///
    /// Fails with [`Error::EndpointBusy`] when another server holds the
    /// endpoint.
    fn serve_once(&self, line: &str, accept_timeout: Duration) -> Result<()>;

    /// Client role: waits up to `connect_timeout` for a server to appear,
    /// then reads one line within `read_timeout`. Never retries after that.
    ///
    /// Gives up with [`Error::Cancelled`] soon after `cancel` is set.
    fn fetch_line(
        &self,
        connect_timeout: Duration,
        read_timeout: Duration,
        cancel: &AtomicBool,
    ) -> Result<String>;
}

/// Bind retry policy of the server role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub accept_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(2),
            accept_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The primary connected and the line was written
    Delivered,
    /// Every bind attempt hit a competing server
    GaveUp,
    /// Bound, but nobody connected in time
    TimedOut,
    /// Unexpected transport error
    Failed,
}

/// Runs the server role with bounded bind retries.
///
/// Total blocking time is at most `attempts * (delay + accept_timeout)`.
pub fn serve_with_retry(
    transport: &dyn HandshakeTransport,
    line: &str,
    policy: &RetryPolicy,
) -> ServeOutcome {
    for attempt in 1..=policy.attempts {
        match transport.serve_once(line, policy.accept_timeout) {
            Ok(()) => {
                log::trace!("Handshake line delivered on attempt {}", attempt);
                return ServeOutcome::Delivered;
            }
            Err(Error::EndpointBusy(endpoint)) => {
                log::info!(
                    "Handshake endpoint '{}' busy (attempt {}/{})",
                    endpoint,
                    attempt,
                    policy.attempts
                );
                if attempt < policy.attempts {
                    std::thread::sleep(policy.delay);
                }
            }
            Err(Error::Timeout(after)) => {
                log::warn!("No primary connected within {:?}, dropping arguments", after);
                return ServeOutcome::TimedOut;
            }
            Err(e) => {
                log::warn!("Handshake server failed: {}", e);
                return ServeOutcome::Failed;
            }
        }
    }

    log::info!("Another secondary holds the handshake endpoint, dropping arguments");
    ServeOutcome::GaveUp
}

/// Races `fut` against a timer
async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    futures::pin_mut!(fut);
    match futures::future::select(fut, Timer::after(timeout)).await {
        Either::Left((res, _)) => Ok(res?),
        Either::Right(_) => Err(Error::Timeout(timeout)),
    }
}

/// Resolves once `cancel` is set
async fn cancelled(cancel: &AtomicBool) {
    while !cancel.load(Ordering::SeqCst) {
        Timer::after(CONNECT_POLL).await;
    }
}

/// Races `fut` against the cancel flag
async fn abandonable<T, F>(cancel: &AtomicBool, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    futures::pin_mut!(fut);
    let cancelled = cancelled(cancel);
    futures::pin_mut!(cancelled);
    match futures::future::select(fut, cancelled).await {
        Either::Left((res, _)) => res,
        Either::Right(_) => Err(Error::Cancelled),
    }
}

/// Unix domain stream socket transport
///
/// On Linux the endpoint lives in the abstract namespace, so it leaves
/// nothing behind on disk and disappears with the listening socket. Other
/// Unix systems get a socket file in the runtime directory.
#[derive(Debug, Clone)]
pub struct LocalSocketTransport {
    endpoint: String,
}

impl LocalSocketTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.is_empty()
            || endpoint.len() > MAX_ENDPOINT_LEN
            || endpoint.contains(['\0', '/'])
        {
            return Err(Error::InvalidName(endpoint));
        }
        Ok(LocalSocketTransport { endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[cfg(target_os = "linux")]
    fn socket_addr(&self) -> io::Result<SocketAddr> {
        use std::os::linux::net::SocketAddrExt;
        SocketAddr::from_abstract_name(self.endpoint.as_bytes())
    }

    #[cfg(not(target_os = "linux"))]
    fn socket_addr(&self) -> io::Result<SocketAddr> {
        SocketAddr::from_pathname(self.socket_path())
    }

    #[cfg(not(target_os = "linux"))]
    fn socket_path(&self) -> std::path::PathBuf {
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        runtime_dir.join(format!("{}.sock", self.endpoint))
    }

    fn bind(&self) -> Result<UnixListener> {
        match UnixListener::bind_addr(&self.socket_addr()?) {
            Ok(listener) => Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                Err(Error::EndpointBusy(self.endpoint.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn connect(&self, timeout: Duration) -> Result<UnixStream> {
        let addr = self.socket_addr()?;
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match UnixStream::connect_addr(&addr) {
                Ok(stream) => return Ok(stream),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                    ) =>
                {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(Error::Timeout(timeout));
                    }
                    Timer::after(CONNECT_POLL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl HandshakeTransport for LocalSocketTransport {
    fn serve_once(&self, line: &str, accept_timeout: Duration) -> Result<()> {
        let listener = self.bind()?;
        #[cfg(not(target_os = "linux"))]
        let _socket_file = SocketFile(self.socket_path());
        let listener = Async::new(listener)?;
        log::trace!("Serving handshake on '{}'", self.endpoint);

        block_on(async {
            let (mut stream, _) = with_timeout(accept_timeout, listener.accept()).await?;
            let line = line.trim_end_matches(['\r', '\n']);
            with_timeout(accept_timeout, async {
                stream.write_all(line.as_bytes()).await?;
                stream.write_all(b"\n").await?;
                stream.close().await
            })
            .await
        })
    }

    fn fetch_line(
        &self,
        connect_timeout: Duration,
        read_timeout: Duration,
        cancel: &AtomicBool,
    ) -> Result<String> {
        block_on(abandonable(cancel, async {
            let stream = Async::new(self.connect(connect_timeout).await?)?;
            log::trace!("Connected to handshake endpoint '{}'", self.endpoint);

            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            with_timeout(read_timeout, reader.read_line(&mut line)).await?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        }))
    }
}

/// Removes the socket file once the server is done with it
#[cfg(not(target_os = "linux"))]
struct SocketFile(std::path::PathBuf);

#[cfg(not(target_os = "linux"))]
impl Drop for SocketFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::sync::Mutex;

    fn unique_endpoint(tag: &str) -> String {
        format!("instance-relay-test-{}-{}", std::process::id(), tag)
    }

    #[test]
    fn rejects_bad_endpoint_names() {
        assert!(LocalSocketTransport::new("").is_err());
        assert!(LocalSocketTransport::new("a/b").is_err());
        assert!(LocalSocketTransport::new("x".repeat(MAX_ENDPOINT_LEN + 1)).is_err());
        assert!(LocalSocketTransport::new("app.handshake").is_ok());
    }

    #[test]
    fn client_receives_served_line() {
        let transport = LocalSocketTransport::new(unique_endpoint("line")).unwrap();
        let server = transport.clone();
        let handle = std::thread::spawn(move || {
            server.serve_once("token --open file.txt", Duration::from_secs(5))
        });

        let line = transport
            .fetch_line(
                Duration::from_secs(5),
                Duration::from_secs(5),
                &AtomicBool::new(false),
            )
            .unwrap();
        assert_eq!(line, "token --open file.txt");
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn second_server_sees_busy_endpoint() {
        let transport = LocalSocketTransport::new(unique_endpoint("busy")).unwrap();
        let _held = transport.bind().unwrap();

        let res = transport.serve_once("second", Duration::from_millis(10));
        assert!(matches!(res, Err(Error::EndpointBusy(_))));
    }

    #[test]
    fn client_times_out_without_server() {
        let transport = LocalSocketTransport::new(unique_endpoint("nobody")).unwrap();
        let started = Instant::now();
        let res = transport.fetch_line(
            Duration::from_millis(200),
            Duration::from_secs(1),
            &AtomicBool::new(false),
        );
        assert!(matches!(res, Err(Error::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cancel_abandons_pending_connect() {
        let transport = LocalSocketTransport::new(unique_endpoint("cancel")).unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            canceller.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let res = transport.fetch_line(Duration::from_secs(10), Duration::from_secs(10), &cancel);
        assert!(matches!(res, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn server_times_out_without_client() {
        let transport = LocalSocketTransport::new(unique_endpoint("lonely")).unwrap();
        let res = transport.serve_once("unread", Duration::from_millis(100));
        assert!(matches!(res, Err(Error::Timeout(_))));

        // Endpoint is free again afterwards
        let res = transport.serve_once("unread", Duration::from_millis(100));
        assert!(matches!(res, Err(Error::Timeout(_))));
    }

    /// Transport whose endpoint is always taken
    struct BusyTransport {
        binds: AtomicU32,
    }

    impl HandshakeTransport for BusyTransport {
        fn serve_once(&self, _line: &str, _accept_timeout: Duration) -> Result<()> {
            self.binds.fetch_add(1, Ordering::SeqCst);
            Err(Error::EndpointBusy("busy".to_string()))
        }

        fn fetch_line(&self, _: Duration, _: Duration, _: &AtomicBool) -> Result<String> {
            unreachable!()
        }
    }

    #[test]
    fn retry_gives_up_after_configured_attempts() {
        let transport = BusyTransport {
            binds: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(20),
            accept_timeout: Duration::from_millis(20),
        };

        let started = Instant::now();
        let outcome = serve_with_retry(&transport, "line", &policy);
        assert_eq!(outcome, ServeOutcome::GaveUp);
        assert_eq!(transport.binds.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    /// Transport that is busy once and then succeeds
    struct BusyOnceTransport {
        served: Mutex<Vec<String>>,
    }

    impl HandshakeTransport for BusyOnceTransport {
        fn serve_once(&self, line: &str, _accept_timeout: Duration) -> Result<()> {
            let mut served = self.served.lock().unwrap();
            served.push(line.to_string());
            if served.len() == 1 {
                Err(Error::EndpointBusy("busy".to_string()))
            } else {
                Ok(())
            }
        }

        fn fetch_line(&self, _: Duration, _: Duration, _: &AtomicBool) -> Result<String> {
            unreachable!()
        }
    }

    #[test]
    fn retry_delivers_once_endpoint_frees_up() {
        let transport = BusyOnceTransport {
            served: Mutex::new(Vec::new()),
        };
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(10),
            accept_timeout: Duration::from_millis(10),
        };
        assert_eq!(
            serve_with_retry(&transport, "line", &policy),
            ServeOutcome::Delivered
        );
        assert_eq!(transport.served.lock().unwrap().len(), 2);
    }
}
