//! Per-server proxy: health state machine over a connection pool.
//!
//! A proxy is `Alive` until `fail_limit` consecutive transport failures mark
//! it `Dead` with a restoration deadline. Once the deadline passes, the
//! first caller to win the try-lock gets to probe: `callable` extends the
//! deadline and returns true, and the subsequent `send` either revives the
//! server or leaves it dead for another interval. Lock contention means
//! another thread is already handling the transition and the caller backs
//! off without blocking.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{info, warn};

use scatter_io::{Connector, ConnectionPool, IoOpts, PoolStrategy, Transport};
use scatter_protocol::{Code, Command, Flavor, Response};

use crate::driver;

/// Per-server proxy configuration.
#[derive(Debug, Clone, Copy)]
pub struct ServerProxyConfig {
    /// Minimum time between probe attempts for a dead server (default: 60s).
    pub restoration_interval: Duration,
    /// Consecutive failures after which the server is marked dead
    /// (default: 1).
    pub fail_limit: u32,
    /// Connection options.
    pub io_opts: IoOpts,
}

impl Default for ServerProxyConfig {
    fn default() -> Self {
        ServerProxyConfig {
            restoration_interval: Duration::from_secs(60),
            fail_limit: 1,
            io_opts: IoOpts::default(),
        }
    }
}

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Health state shared by every handle to one server.
///
/// The atomics serve the lock-free `callable` fast path; the lock guards
/// the death transition and the probe handshake. `restoration_ms == 0`
/// means the server was never marked dead.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    restoration_ms: AtomicU64,
    dead: AtomicBool,
    fails: AtomicU32,
    lock: Mutex<()>,
}

/// One server's proxy: connection pool, wire flavor, and shared health.
pub(crate) struct ServerProxy<C: Connector> {
    restoration_interval: Duration,
    fail_limit: u32,
    shared: Arc<[SharedState]>,
    slot: usize,
    flavor: Flavor,
    pool: ConnectionPool<C>,
}

impl<C: Connector> ServerProxy<C>
where
    C::Conn: Transport,
{
    pub(crate) fn new(
        connector: C,
        shared: Arc<[SharedState]>,
        slot: usize,
        flavor: Flavor,
        strategy: PoolStrategy,
        config: &ServerProxyConfig,
    ) -> Self {
        let pool = ConnectionPool::new(
            connector,
            strategy,
            config.io_opts.max_connections_in_pool,
        );
        ServerProxy {
            restoration_interval: config.restoration_interval,
            fail_limit: config.fail_limit,
            shared,
            slot,
            flavor,
            pool,
        }
    }

    fn shared(&self) -> &SharedState {
        &self.shared[self.slot]
    }

    fn interval_ms(&self) -> u64 {
        self.restoration_interval.as_millis() as u64
    }

    pub(crate) fn server_name(&self) -> &str {
        self.pool.server_name()
    }

    /// True if the server is not dead, or if this caller won the right to
    /// probe it. A true return is a commitment: call `send` immediately.
    pub(crate) fn callable(&self) -> bool {
        let shared = self.shared();
        if !shared.dead.load(Ordering::Acquire) {
            return true;
        }

        let now = now_ms();
        if now < shared.restoration_ms.load(Ordering::Acquire) {
            return false;
        }

        // Someone else holding the lock is already probing.
        let Some(_guard) = shared.lock.try_lock() else {
            return false;
        };

        shared
            .restoration_ms
            .store(now + self.interval_ms(), Ordering::Release);
        info!(
            server = self.server_name(),
            restoration_interval = ?self.restoration_interval,
            "restoration timeout expired, probing server"
        );
        true
    }

    /// Time since this server was last marked dead.
    ///
    /// A server that was never marked dead reports the time since the epoch;
    /// callers treat an enormous lifespan as "never died".
    pub(crate) fn lifespan(&self) -> Duration {
        let restoration = self.shared().restoration_ms.load(Ordering::Acquire);
        let now = now_ms();
        if restoration == 0 {
            return Duration::from_millis(now);
        }
        let died_at = restoration.saturating_sub(self.interval_ms());
        Duration::from_millis(now.saturating_sub(died_at))
    }

    /// Runs one command against this server.
    ///
    /// Transport failures are consumed here: they feed the failure counter
    /// and come back as synthetic `io-error` responses so the client loop
    /// can advance to the next candidate.
    pub(crate) fn send(&self, command: &Command, frame: &[u8]) -> Response {
        let result = self.pool.pick().and_then(|mut conn| {
            let response = driver::exchange(&mut conn, self.flavor, command, frame)?;
            // The exchange completed, so the server is alive regardless of
            // the response code.
            self.shared().dead.store(false, Ordering::Release);
            self.shared().fails.store(0, Ordering::Release);
            // Only protocol-complete responses leave the connection in a
            // known state worth reusing.
            if response.code.is_reusable() {
                self.pool.put_back(conn);
            }
            Ok(response)
        });

        match result {
            Ok(response) => response,
            Err(err) => {
                self.register_failure(&err.to_string());
                Response::new(Code::IoError, format!("connection failed: {err}"))
            }
        }
    }

    fn register_failure(&self, reason: &str) {
        let shared = self.shared();
        // Lock contention means another caller is already driving the
        // transition; this one just reports the io-error.
        let Some(_guard) = shared.lock.try_lock() else {
            return;
        };
        let fails = shared.fails.fetch_add(1, Ordering::AcqRel) + 1;
        if fails >= self.fail_limit {
            self.pool.clear();
            shared
                .restoration_ms
                .store(now_ms() + self.interval_ms(), Ordering::Release);
            shared.dead.store(true, Ordering::Release);
            warn!(
                server = self.server_name(),
                fails,
                fail_limit = self.fail_limit,
                restoration_interval = ?self.restoration_interval,
                reason,
                "server marked dead"
            );
        }
    }

    /// Human-readable health snapshot, used by `Client::dump`.
    pub(crate) fn state(&self) -> String {
        let shared = self.shared();
        format!(
            "{} [connections-in-pool={}, new-restoration-attempt={}, fails={}, dead={}]",
            self.server_name(),
            self.pool.len(),
            shared.restoration_ms.load(Ordering::Acquire) / 1000,
            shared.fails.load(Ordering::Acquire),
            u32::from(shared.dead.load(Ordering::Acquire)),
        )
    }

    #[cfg(test)]
    pub(crate) fn cached_connections(&self) -> usize {
        self.pool.len()
    }

    #[cfg(test)]
    pub(crate) fn is_dead(&self) -> bool {
        self.shared().dead.load(Ordering::Acquire)
    }
}

/// Allocates the shared health block for `count` servers.
pub(crate) fn shared_block(count: usize) -> Arc<[SharedState]> {
    (0..count)
        .map(|_| SharedState::default())
        .collect::<Vec<_>>()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scatter_io::IoError;
    use scatter_protocol::RetrieveVerb;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted connector: each connect either refuses or yields a
    /// connection that replies with fixed bytes.
    struct ScriptConnector {
        script: StdMutex<VecDeque<Result<Vec<u8>, ()>>>,
    }

    impl ScriptConnector {
        fn new(script: Vec<Result<Vec<u8>, ()>>) -> Self {
            ScriptConnector {
                script: StdMutex::new(script.into()),
            }
        }
    }

    impl Connector for ScriptConnector {
        type Conn = ScriptConn;

        fn connect(&self) -> Result<ScriptConn, IoError> {
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(ScriptConn { reply }),
                Some(Err(())) | None => Err(IoError::Io("connection refused".into())),
            }
        }

        fn server_name(&self) -> &str {
            "script:11211"
        }
    }

    struct ScriptConn {
        reply: Vec<u8>,
    }

    impl ScriptConn {
        fn take(&mut self, count: usize) -> Vec<u8> {
            let rest = self.reply.split_off(count);
            std::mem::replace(&mut self.reply, rest)
        }
    }

    impl Transport for ScriptConn {
        fn write(&mut self, _data: &[u8]) -> Result<(), IoError> {
            Ok(())
        }

        fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, IoError> {
            let at = self
                .reply
                .windows(delimiter.len())
                .position(|w| w == delimiter)
                .ok_or_else(|| IoError::Io("no delimiter".into()))?;
            Ok(self.take(at + delimiter.len()))
        }

        fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, IoError> {
            if count > self.reply.len() {
                return Err(IoError::Io("short read".into()));
            }
            Ok(self.take(count))
        }
    }

    fn proxy_with(
        script: Vec<Result<Vec<u8>, ()>>,
        config: &ServerProxyConfig,
    ) -> ServerProxy<ScriptConnector> {
        ServerProxy::new(
            ScriptConnector::new(script),
            shared_block(1),
            0,
            Flavor::Text,
            PoolStrategy::Caching,
            config,
        )
    }

    fn get_command() -> (Command, Vec<u8>) {
        let command = Command::Retrieve {
            verb: RetrieveVerb::Get,
            key: b"k".to_vec(),
        };
        let frame = Flavor::Text.serialize(&command).unwrap();
        (command, frame)
    }

    #[test]
    fn success_returns_connection_to_pool() {
        let proxy = proxy_with(
            vec![Ok(b"VALUE k 0 1\r\nv\r\nEND\r\n".to_vec())],
            &ServerProxyConfig::default(),
        );
        let (command, frame) = get_command();
        assert!(proxy.callable());
        let response = proxy.send(&command, &frame);
        assert_eq!(response.code, Code::Ok);
        assert_eq!(proxy.cached_connections(), 1);
        assert!(!proxy.is_dead());
    }

    #[test]
    fn miss_is_protocol_complete_and_reusable() {
        let proxy = proxy_with(vec![Ok(b"END\r\n".to_vec())], &ServerProxyConfig::default());
        let (command, frame) = get_command();
        let response = proxy.send(&command, &frame);
        assert_eq!(response.code, Code::NotFound);
        assert_eq!(proxy.cached_connections(), 1);
    }

    #[test]
    fn unrecognized_response_taints_connection() {
        let proxy = proxy_with(
            vec![Ok(b"GIBBERISH\r\n".to_vec())],
            &ServerProxyConfig::default(),
        );
        let (command, frame) = get_command();
        let response = proxy.send(&command, &frame);
        assert_eq!(response.code, Code::Unrecognized);
        assert_eq!(proxy.cached_connections(), 0);
        // Not a transport failure: the server stays alive.
        assert!(!proxy.is_dead());
    }

    #[test]
    fn fail_limit_gates_death() {
        let config = ServerProxyConfig {
            fail_limit: 2,
            restoration_interval: Duration::from_secs(60),
            ..ServerProxyConfig::default()
        };
        let proxy = proxy_with(vec![Err(()), Err(())], &config);
        let (command, frame) = get_command();

        let response = proxy.send(&command, &frame);
        assert_eq!(response.code, Code::IoError);
        assert!(!proxy.is_dead(), "one failure below the limit");
        assert!(proxy.callable());

        let response = proxy.send(&command, &frame);
        assert_eq!(response.code, Code::IoError);
        assert!(proxy.is_dead());
        assert!(!proxy.callable(), "dead inside the restoration interval");
    }

    #[test]
    fn probe_after_restoration_revives() {
        let config = ServerProxyConfig {
            fail_limit: 1,
            restoration_interval: Duration::from_millis(20),
            ..ServerProxyConfig::default()
        };
        let proxy = proxy_with(vec![Err(()), Ok(b"END\r\n".to_vec())], &config);
        let (command, frame) = get_command();

        assert_eq!(proxy.send(&command, &frame).code, Code::IoError);
        assert!(proxy.is_dead());

        std::thread::sleep(Duration::from_millis(40));
        // Deadline passed: this caller wins the probe.
        assert!(proxy.callable());
        let response = proxy.send(&command, &frame);
        assert_eq!(response.code, Code::NotFound);
        assert!(!proxy.is_dead(), "successful probe revives the server");
        // Freshly revived: lifespan is small.
        assert!(proxy.lifespan() < Duration::from_secs(5));
    }

    #[test]
    fn failed_probe_extends_deadline() {
        let config = ServerProxyConfig {
            fail_limit: 1,
            restoration_interval: Duration::from_millis(30),
            ..ServerProxyConfig::default()
        };
        let proxy = proxy_with(vec![Err(()), Err(())], &config);
        let (command, frame) = get_command();

        assert_eq!(proxy.send(&command, &frame).code, Code::IoError);
        std::thread::sleep(Duration::from_millis(50));
        assert!(proxy.callable());
        assert_eq!(proxy.send(&command, &frame).code, Code::IoError);
        assert!(proxy.is_dead());
        // The probe handshake pushed the deadline out again.
        assert!(!proxy.callable());
    }

    #[test]
    fn never_dead_lifespan_is_enormous() {
        let proxy = proxy_with(vec![], &ServerProxyConfig::default());
        assert!(proxy.lifespan() > Duration::from_secs(60 * 60 * 24 * 365));
    }

    #[test]
    fn state_string_shape() {
        let proxy = proxy_with(vec![], &ServerProxyConfig::default());
        let state = proxy.state();
        assert!(state.starts_with("script:11211 [connections-in-pool=0"));
        assert!(state.contains("fails=0"));
        assert!(state.contains("dead=0"));
    }
}
