//! Sharded memcache client.
//!
//! Keys are distributed over a fleet of servers with a consistent-hashing
//! ring; each server sits behind a proxy that tracks its health, pools its
//! connections, and speaks either the text or the binary wire protocol.
//! The client loop walks the ring, skips dead servers, retries transport
//! failures on the next candidate, and gives freshly revived servers a
//! grace window before trusting their misses.
//!
//! Clone-able, Send + Sync. All clones share the same proxies and health
//! state.
//!
//! # Example
//!
//! ```no_run
//! use scatter_client::{Client, Config, Opts};
//!
//! # fn example() -> Result<(), scatter_client::ClientError> {
//! let client = Client::new(
//!     &["cache1.example.com:11211", "cache2.example.com:11211"],
//!     Config::default(),
//! )?;
//!
//! client.set(b"greeting", "hello", Opts::default())?;
//! let value = client.get(b"greeting")?;
//! assert!(value.found);
//!
//! client.delete(b"greeting")?;
//! # Ok(())
//! # }
//! ```

mod config;
mod driver;
mod error;
mod latency;
mod proxies;
mod proxy;
pub mod ring;

pub use config::{ClientConfig, Config};
pub use error::ClientError;
pub use latency::{ClientLatency, OpFamily};
pub use proxy::ServerProxyConfig;
pub use ring::{ConsistentHashRing, ModPool, PoolConfig, RouterKind};

pub use scatter_hash::{HashFn, HashKind};
pub use scatter_io::{IoOpts, PoolStrategy, Timeouts, TransportKind};
pub use scatter_protocol::{Code, Flavor, Opts};

use std::sync::Arc;
use std::time::{Duration, Instant};

use scatter_io::NetConnector;
use scatter_protocol::{
    validate_key, ArithVerb, Command, Response, RetrieveVerb, StoreVerb,
};

use proxies::ServerProxies;
use ring::Router;

/// Result of a retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    /// True if the key was found on a server.
    pub found: bool,
    /// The stored bytes.
    pub data: Vec<u8>,
    /// The opaque flags stored with the value.
    pub flags: u32,
    /// CAS token (populated by `gets`).
    pub cas: u64,
}

impl LookupResult {
    fn miss() -> Self {
        LookupResult {
            found: false,
            data: Vec::new(),
            flags: 0,
            cas: 0,
        }
    }
}

/// Outcome of a broadcast `flush_all`.
#[derive(Debug, Clone)]
pub struct FlushSummary {
    /// True if every server acknowledged the flush.
    pub ok: bool,
    /// Failing servers' messages, when any.
    pub detail: String,
}

/// Sharded memcache client. See the crate docs for the overall shape.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    router: Router,
    proxies: ServerProxies<NetConnector>,
    flavor: Flavor,
    max_continues: u32,
    h404_duration: Duration,
    latency: ClientLatency,
}

impl Client {
    /// Builds a client over `addresses` (each `host:port`).
    pub fn new<A: AsRef<str>>(addresses: &[A], config: Config) -> Result<Client, ClientError> {
        if addresses.is_empty() {
            return Err(ClientError::BadArgument(
                "at least one server address required".into(),
            ));
        }
        let router = Router::new(addresses, &config.pool);
        let connectors = addresses
            .iter()
            .map(|addr| NetConnector::new(config.transport, addr.as_ref(), config.proxy.io_opts))
            .collect();
        let proxies = ServerProxies::new(
            connectors,
            config.protocol,
            config.strategy,
            &config.proxy,
        );
        Ok(Client {
            inner: Arc::new(ClientInner {
                router,
                proxies,
                flavor: config.protocol,
                max_continues: config.client.max_continues,
                h404_duration: config.client.h404_duration,
                latency: ClientLatency::new(),
            }),
        })
    }

    /// Stores `data` under `key` unconditionally.
    pub fn set(
        &self,
        key: &[u8],
        data: impl Into<Vec<u8>>,
        opts: Opts,
    ) -> Result<(), ClientError> {
        let response = self.run(
            &Command::Store {
                verb: StoreVerb::Set,
                key: key.to_vec(),
                data: data.into(),
                opts,
            },
            false,
        )?;
        match response.code {
            Code::Ok | Code::Stored => Ok(()),
            _ => Err(ClientError::from_response(&response)),
        }
    }

    /// Stores `data` only if `key` is absent. Returns true if it was added.
    pub fn add(
        &self,
        key: &[u8],
        data: impl Into<Vec<u8>>,
        opts: Opts,
    ) -> Result<bool, ClientError> {
        let response = self.run(
            &Command::Store {
                verb: StoreVerb::Add,
                key: key.to_vec(),
                data: data.into(),
                opts,
            },
            false,
        )?;
        match response.code {
            Code::Ok | Code::Stored => Ok(true),
            Code::Exists | Code::NotStored => Ok(false),
            _ => Err(ClientError::from_response(&response)),
        }
    }

    /// Stores `data` only if `key` exists. Returns true if it was replaced.
    pub fn replace(
        &self,
        key: &[u8],
        data: impl Into<Vec<u8>>,
        opts: Opts,
    ) -> Result<bool, ClientError> {
        self.store_existing(StoreVerb::Replace, key, data.into(), opts)
    }

    /// Appends `data` to an existing value. Returns true if it was appended.
    pub fn append(
        &self,
        key: &[u8],
        data: impl Into<Vec<u8>>,
        opts: Opts,
    ) -> Result<bool, ClientError> {
        self.store_existing(StoreVerb::Append, key, data.into(), opts)
    }

    /// Prepends `data` to an existing value. Returns true if it was
    /// prepended.
    pub fn prepend(
        &self,
        key: &[u8],
        data: impl Into<Vec<u8>>,
        opts: Opts,
    ) -> Result<bool, ClientError> {
        self.store_existing(StoreVerb::Prepend, key, data.into(), opts)
    }

    fn store_existing(
        &self,
        verb: StoreVerb,
        key: &[u8],
        data: Vec<u8>,
        opts: Opts,
    ) -> Result<bool, ClientError> {
        let response = self.run(
            &Command::Store {
                verb,
                key: key.to_vec(),
                data,
                opts,
            },
            false,
        )?;
        match response.code {
            Code::Ok | Code::Stored => Ok(true),
            Code::NotStored => Ok(false),
            _ => Err(ClientError::from_response(&response)),
        }
    }

    /// Check-and-set: stores `data` only if the value is unchanged since
    /// the `gets` that produced `opts`' CAS token.
    ///
    /// Returns true on success and false if the key has meanwhile vanished.
    /// A stale token fails with a [`Code::Exists`] response error, so
    /// optimistic loops can distinguish "retry" from "give up" — or use
    /// [`atomic_update`](Self::atomic_update), which does.
    pub fn cas(
        &self,
        key: &[u8],
        data: impl Into<Vec<u8>>,
        opts: Opts,
    ) -> Result<bool, ClientError> {
        if opts.cas() == 0 {
            return Err(ClientError::BadArgument("invalid cas".into()));
        }
        let response = self.run(
            &Command::Store {
                verb: StoreVerb::Cas,
                key: key.to_vec(),
                data: data.into(),
                opts,
            },
            false,
        )?;
        match response.code {
            Code::Ok | Code::Stored => Ok(true),
            Code::NotFound => Ok(false),
            _ => Err(ClientError::from_response(&response)),
        }
    }

    /// Retrieves the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<LookupResult, ClientError> {
        let response = self.run(
            &Command::Retrieve {
                verb: RetrieveVerb::Get,
                key: key.to_vec(),
            },
            true,
        )?;
        self.lookup_result(response)
    }

    /// Retrieves the value and its CAS token.
    pub fn gets(&self, key: &[u8]) -> Result<LookupResult, ClientError> {
        let response = self.run(
            &Command::Retrieve {
                verb: RetrieveVerb::Gets,
                key: key.to_vec(),
            },
            true,
        )?;
        self.lookup_result(response)
    }

    fn lookup_result(&self, response: Response) -> Result<LookupResult, ClientError> {
        match response.code {
            Code::Ok => Ok(LookupResult {
                found: true,
                flags: response.flags,
                cas: response.cas,
                data: response.data,
            }),
            Code::NotFound => Ok(LookupResult::miss()),
            _ => Err(ClientError::from_response(&response)),
        }
    }

    /// Increments the counter at `key` by `delta`.
    ///
    /// Returns `(new_value, found)`. Under the binary protocol
    /// `opts.initial()` seeds an absent counter; the text protocol rejects
    /// a nonzero initial as a bad argument.
    pub fn incr(&self, key: &[u8], delta: u64, opts: Opts) -> Result<(u64, bool), ClientError> {
        self.arith(ArithVerb::Incr, key, delta, opts)
    }

    /// Decrements the counter at `key` by `delta`. See [`incr`](Self::incr).
    pub fn decr(&self, key: &[u8], delta: u64, opts: Opts) -> Result<(u64, bool), ClientError> {
        self.arith(ArithVerb::Decr, key, delta, opts)
    }

    fn arith(
        &self,
        verb: ArithVerb,
        key: &[u8],
        delta: u64,
        opts: Opts,
    ) -> Result<(u64, bool), ClientError> {
        let response = self.run(
            &Command::Arith {
                verb,
                key: key.to_vec(),
                delta,
                opts,
            },
            false,
        )?;
        match response.code {
            Code::Ok => Ok((parse_counter(&response)?, true)),
            Code::NotFound => Ok((0, false)),
            _ => Err(ClientError::from_response(&response)),
        }
    }

    /// Resets the expiration of `key`. Returns true if the key existed.
    pub fn touch(&self, key: &[u8], expiration: u32) -> Result<bool, ClientError> {
        let response = self.run(
            &Command::Touch {
                key: key.to_vec(),
                expiration,
            },
            false,
        )?;
        match response.code {
            Code::Touched => Ok(true),
            Code::NotFound => Ok(false),
            _ => Err(ClientError::from_response(&response)),
        }
    }

    /// Deletes `key`. Returns true if it existed.
    pub fn delete(&self, key: &[u8]) -> Result<bool, ClientError> {
        let response = self.run(&Command::Delete { key: key.to_vec() }, false)?;
        match response.code {
            Code::Ok | Code::Deleted => Ok(true),
            Code::NotFound => Ok(false),
            _ => Err(ClientError::from_response(&response)),
        }
    }

    /// Broadcasts `flush_all` to every server.
    ///
    /// `expiration` delays the flush server-side; zero flushes immediately.
    pub fn flush_all(&self, expiration: u32) -> Result<FlushSummary, ClientError> {
        let responses = self.run_all(&Command::FlushAll { expiration })?;
        let mut errors = 0u32;
        let mut detail = String::new();
        for response in &responses {
            if response.code != Code::Ok {
                errors += 1;
                if !detail.is_empty() {
                    detail.push_str(", ");
                }
                detail.push('<');
                detail.push_str(&response.message());
                detail.push('>');
            }
        }
        Ok(FlushSummary {
            ok: errors == 0,
            detail,
        })
    }

    /// Read-transform-write loop built on `gets`/`cas`, falling back to
    /// `add` when the key is absent.
    ///
    /// `transform` receives the current value (or `None`) and its flags and
    /// produces the new value and flags. The loop retries on CAS conflicts
    /// up to `opts.iters()` times (default 64) and fails with
    /// [`ClientError::UnableCas`] when the cap is reached.
    pub fn atomic_update<F>(
        &self,
        key: &[u8],
        mut transform: F,
        opts: Opts,
    ) -> Result<(Vec<u8>, u32), ClientError>
    where
        F: FnMut(Option<&[u8]>, u32) -> (Vec<u8>, u32),
    {
        let iters = if opts.iters() != 0 { opts.iters() } else { 64 };
        for _ in 0..iters {
            let current = self.gets(key)?;
            if current.found {
                let (data, flags) = transform(Some(&current.data), current.flags);
                let cas_opts = Opts::with_cas(opts.expiration, flags, current.cas);
                match self.cas(key, data.clone(), cas_opts) {
                    // The value vanished between gets and cas; start over.
                    Ok(false) => {}
                    Ok(true) => return Ok((data, flags)),
                    Err(err) if err.code() == Some(Code::Exists) => {}
                    Err(err) => return Err(err),
                }
            } else {
                let (data, flags) = transform(None, 0);
                let add_opts = Opts::new(opts.expiration, flags);
                if self.add(key, data.clone(), add_opts)? {
                    return Ok((data, flags));
                }
                // Another writer added first; retry against their value.
            }
        }
        Err(ClientError::UnableCas)
    }

    /// Renders the ring and per-server health for diagnostics.
    pub fn dump(&self) -> String {
        let states: Vec<String> = self.inner.proxies.iter().map(|p| p.state()).collect();
        self.inner.router.dump(&states)
    }

    /// Per-family wire latency recorded by this client.
    pub fn latency(&self) -> &ClientLatency {
        &self.inner.latency
    }

    /// Routes one command along the ring with the retry policy.
    ///
    /// `h404` enables the probing-window heuristic: a miss from the first
    /// candidate is retried one hop further when that server was restored
    /// recently, because a freshly revived server may not yet hold data its
    /// ring successor has been serving meanwhile.
    fn run(&self, command: &Command, h404: bool) -> Result<Response, ClientError> {
        if let Some(key) = command.key() {
            validate_key(key).map_err(|err| ClientError::BadArgument(err.to_string()))?;
        }
        let frame = self
            .inner
            .flavor
            .serialize(command)
            .map_err(|err| ClientError::BadArgument(err.to_string()))?;

        let mut previous = u32::MAX;
        let mut continues = 0u32;
        let mut out_of_servers = true;
        let mut candidates = self.inner.router.choose(command.key().unwrap_or_default());

        while continues < self.inner.max_continues {
            let Some(index) = candidates.next() else {
                break;
            };
            // Adjacent virtual nodes of the same server collapse into one
            // attempt.
            if index == previous {
                continue;
            }
            previous = index;

            let proxy = &self.inner.proxies[index as usize];
            if proxy.callable() {
                let start = Instant::now();
                let response = proxy.send(command, &frame);
                self.inner.latency.record(command, start.elapsed());
                match response.code {
                    Code::IoError => {}
                    Code::NotFound
                        if h404
                            && continues == 0
                            && proxy.lifespan() < self.inner.h404_duration =>
                    {
                        out_of_servers = false;
                    }
                    _ => return Ok(response),
                }
            }
            continues += 1;
        }

        if out_of_servers {
            return Err(ClientError::OutOfServers);
        }
        Ok(Response::new(Code::NotFound, "not found"))
    }

    /// Sends one command to every server; dead servers produce synthetic
    /// error responses.
    fn run_all(&self, command: &Command) -> Result<Vec<Response>, ClientError> {
        let frame = self
            .inner
            .flavor
            .serialize(command)
            .map_err(|err| ClientError::BadArgument(err.to_string()))?;
        Ok(self
            .inner
            .proxies
            .iter()
            .map(|proxy| {
                if proxy.callable() {
                    proxy.send(command, &frame)
                } else {
                    Response::new(Code::Error, "dead")
                }
            })
            .collect())
    }
}

fn parse_counter(response: &Response) -> Result<u64, ClientError> {
    std::str::from_utf8(&response.data)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| ClientError::Response {
            code: Code::Invalid,
            message: format!("bad counter value: {}", response.message()),
        })
}
