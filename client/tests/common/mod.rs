//! A small in-memory memcache server speaking the text protocol.
//!
//! Enough of the real thing to exercise the client end to end: stateful
//! storage with CAS tokens, counters, touch, and flush. Each connection is
//! served by its own thread so concurrent client threads see a live fleet.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone)]
struct Entry {
    data: Vec<u8>,
    flags: u32,
    cas: u64,
}

type Store = Arc<Mutex<HashMap<Vec<u8>, Entry>>>;

pub struct MockServer {
    addr: String,
    shutdown: Arc<AtomicBool>,
}

impl MockServer {
    /// Starts a server on an ephemeral port.
    pub fn start() -> MockServer {
        Self::bind("127.0.0.1:0")
    }

    /// Starts a server on a specific address (used to "revive" a server on
    /// a port the client already knows).
    pub fn bind(addr: &str) -> MockServer {
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shutdown = Arc::new(AtomicBool::new(false));
        let store: Store = Arc::new(Mutex::new(HashMap::new()));
        let cas_counter = Arc::new(AtomicU64::new(0));

        let accept_shutdown = shutdown.clone();
        thread::spawn(move || loop {
            if accept_shutdown.load(Ordering::Relaxed) {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false).unwrap();
                    let store = store.clone();
                    let cas_counter = cas_counter.clone();
                    thread::spawn(move || serve_connection(stream, store, cas_counter));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(_) => break,
            }
        });

        MockServer { addr, shutdown }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Grabs a free TCP port and releases it, so a test can point a client at a
/// dead address (and optionally start a server there later).
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn serve_connection(stream: TcpStream, store: Store, cas_counter: Arc<AtomicU64>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        while line.last() == Some(&b'\r') || line.last() == Some(&b'\n') {
            line.pop();
        }
        let text = String::from_utf8_lossy(&line).into_owned();
        let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
        let reply = match tokens.first().copied() {
            Some("set" | "add" | "replace" | "append" | "prepend" | "cas") => {
                handle_storage(&tokens, &mut reader, &store, &cas_counter)
            }
            Some("get" | "gets") => handle_retrieve(&tokens, &store),
            Some("delete") => handle_delete(&tokens, &store),
            Some("incr" | "decr") => handle_arith(&tokens, &store, &cas_counter),
            Some("touch") => handle_touch(&tokens, &store),
            Some("flush_all") => {
                store.lock().unwrap().clear();
                b"OK\r\n".to_vec()
            }
            _ => b"ERROR\r\n".to_vec(),
        };
        if writer.write_all(&reply).is_err() {
            break;
        }
    }
}

fn handle_storage(
    tokens: &[&str],
    reader: &mut BufReader<TcpStream>,
    store: &Store,
    cas_counter: &AtomicU64,
) -> Vec<u8> {
    // <verb> <key> <flags> <exptime> <bytes> [<cas>]
    if tokens.len() < 5 {
        return b"CLIENT_ERROR bad command line format\r\n".to_vec();
    }
    let verb = tokens[0];
    let key = tokens[1].as_bytes().to_vec();
    let flags: u32 = tokens[2].parse().unwrap_or(0);
    let bytes: usize = tokens[4].parse().unwrap_or(0);
    let token: u64 = tokens.get(5).and_then(|t| t.parse().ok()).unwrap_or(0);

    // The payload plus its trailing CRLF.
    let mut payload = vec![0u8; bytes + 2];
    if reader.read_exact(&mut payload).is_err() {
        return b"CLIENT_ERROR bad data chunk\r\n".to_vec();
    }
    payload.truncate(bytes);

    let mut guard = store.lock().unwrap();
    let next_cas = || cas_counter.fetch_add(1, Ordering::Relaxed) + 1;
    match verb {
        "set" => {
            guard.insert(
                key,
                Entry {
                    data: payload,
                    flags,
                    cas: next_cas(),
                },
            );
            b"STORED\r\n".to_vec()
        }
        "add" => {
            if guard.contains_key(&key) {
                b"NOT_STORED\r\n".to_vec()
            } else {
                guard.insert(
                    key,
                    Entry {
                        data: payload,
                        flags,
                        cas: next_cas(),
                    },
                );
                b"STORED\r\n".to_vec()
            }
        }
        "replace" => {
            if guard.contains_key(&key) {
                guard.insert(
                    key,
                    Entry {
                        data: payload,
                        flags,
                        cas: next_cas(),
                    },
                );
                b"STORED\r\n".to_vec()
            } else {
                b"NOT_STORED\r\n".to_vec()
            }
        }
        "append" | "prepend" => match guard.get_mut(&key) {
            Some(entry) => {
                if verb == "append" {
                    entry.data.extend_from_slice(&payload);
                } else {
                    let mut data = payload;
                    data.extend_from_slice(&entry.data);
                    entry.data = data;
                }
                entry.cas = next_cas();
                b"STORED\r\n".to_vec()
            }
            None => b"NOT_STORED\r\n".to_vec(),
        },
        "cas" => match guard.get(&key) {
            None => b"NOT_FOUND\r\n".to_vec(),
            Some(entry) if entry.cas == token => {
                guard.insert(
                    key,
                    Entry {
                        data: payload,
                        flags,
                        cas: next_cas(),
                    },
                );
                b"STORED\r\n".to_vec()
            }
            Some(_) => b"EXISTS\r\n".to_vec(),
        },
        _ => b"ERROR\r\n".to_vec(),
    }
}

fn handle_retrieve(tokens: &[&str], store: &Store) -> Vec<u8> {
    if tokens.len() != 2 {
        return b"CLIENT_ERROR bad command line format\r\n".to_vec();
    }
    let with_cas = tokens[0] == "gets";
    let key = tokens[1].as_bytes();
    let guard = store.lock().unwrap();
    match guard.get(key) {
        Some(entry) => {
            let mut reply = format!("VALUE {} {} {}", tokens[1], entry.flags, entry.data.len());
            if with_cas {
                reply.push_str(&format!(" {}", entry.cas));
            }
            reply.push_str("\r\n");
            let mut reply = reply.into_bytes();
            reply.extend_from_slice(&entry.data);
            reply.extend_from_slice(b"\r\nEND\r\n");
            reply
        }
        None => b"END\r\n".to_vec(),
    }
}

fn handle_delete(tokens: &[&str], store: &Store) -> Vec<u8> {
    if tokens.len() != 2 {
        return b"CLIENT_ERROR bad command line format\r\n".to_vec();
    }
    match store.lock().unwrap().remove(tokens[1].as_bytes()) {
        Some(_) => b"DELETED\r\n".to_vec(),
        None => b"NOT_FOUND\r\n".to_vec(),
    }
}

fn handle_arith(tokens: &[&str], store: &Store, cas_counter: &AtomicU64) -> Vec<u8> {
    if tokens.len() != 3 {
        return b"CLIENT_ERROR bad command line format\r\n".to_vec();
    }
    let delta: u64 = match tokens[2].parse() {
        Ok(delta) => delta,
        Err(_) => return b"CLIENT_ERROR invalid numeric delta argument\r\n".to_vec(),
    };
    let mut guard = store.lock().unwrap();
    match guard.get_mut(tokens[1].as_bytes()) {
        None => b"NOT_FOUND\r\n".to_vec(),
        Some(entry) => {
            let current: u64 = match std::str::from_utf8(&entry.data)
                .ok()
                .and_then(|text| text.trim().parse().ok())
            {
                Some(value) => value,
                None => {
                    return b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n"
                        .to_vec()
                }
            };
            let value = if tokens[0] == "incr" {
                current.wrapping_add(delta)
            } else {
                current.saturating_sub(delta)
            };
            entry.data = value.to_string().into_bytes();
            entry.cas = cas_counter.fetch_add(1, Ordering::Relaxed) + 1;
            format!("{value}\r\n").into_bytes()
        }
    }
}

fn handle_touch(tokens: &[&str], store: &Store) -> Vec<u8> {
    if tokens.len() != 3 {
        return b"CLIENT_ERROR bad command line format\r\n".to_vec();
    }
    if store.lock().unwrap().contains_key(tokens[1].as_bytes()) {
        b"TOUCHED\r\n".to_vec()
    } else {
        b"NOT_FOUND\r\n".to_vec()
    }
}
