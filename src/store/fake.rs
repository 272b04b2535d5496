//! Minimal in-process RESP2 server for tests that need a live store.
//!
//! Understands PING, GET, SET, SETEX, DEL, SCAN (with MATCH) and PUBLISH,
//! answers `+OK` to anything else, and records every command it receives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::config::StoreConfig;

const NORMAL: u8 = 0;
/// Read commands, never answer; the connection stays open.
const SILENT: u8 = 1;
/// Close the socket on the next command.
const DROPPING: u8 = 2;

#[derive(Default)]
struct Shared {
    data: Mutex<HashMap<String, Vec<u8>>>,
    log: Mutex<Vec<Vec<String>>>,
    mode: AtomicU8,
    delay_ms: AtomicU64,
    connections: AtomicUsize,
}

#[derive(Clone)]
pub(crate) struct FakeRedis {
    port: u16,
    shared: Arc<Shared>,
}

impl FakeRedis {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared::default());

        let accepting = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accepting.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, Arc::clone(&accepting)));
            }
        });

        Self { port, shared }
    }

    /// Short timeouts and a long cool-down; tests override what they need.
    pub(crate) fn store_config(&self) -> StoreConfig {
        StoreConfig {
            host: Some("127.0.0.1".to_string()),
            port: self.port,
            pool_size: 2,
            connect_timeout_ms: 1_000,
            command_timeout_ms: 300,
            reconnect_cooldown_ms: 60_000,
            ..StoreConfig::default()
        }
    }

    pub(crate) fn go_silent(&self) {
        self.shared.mode.store(SILENT, Ordering::SeqCst);
    }

    pub(crate) fn drop_connections(&self) {
        self.shared.mode.store(DROPPING, Ordering::SeqCst);
    }

    pub(crate) fn resume(&self) {
        self.shared.mode.store(NORMAL, Ordering::SeqCst);
    }

    /// Delay before every reply.
    pub(crate) fn set_delay(&self, delay: Duration) {
        self.shared.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn insert(&self, key: &str, value: Vec<u8>) {
        self.shared.data.lock().unwrap().insert(key.to_string(), value);
    }

    pub(crate) fn remove(&self, key: &str) {
        self.shared.data.lock().unwrap().remove(key);
    }

    pub(crate) fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.shared.data.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.data.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Every received command with `name`, arguments included.
    pub(crate) fn commands(&self, name: &str) -> Vec<Vec<String>> {
        self.shared
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args[0] == name)
            .cloned()
            .collect()
    }

    /// Names of every received command, in arrival order.
    pub(crate) fn command_names(&self) -> Vec<String> {
        self.shared.log.lock().unwrap().iter().map(|args| args[0].clone()).collect()
    }
}

async fn serve(socket: TcpStream, shared: Arc<Shared>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    while let Some(args) = read_command(&mut reader).await {
        match shared.mode.load(Ordering::SeqCst) {
            SILENT => std::future::pending::<()>().await,
            DROPPING => return,
            _ => {}
        }

        let delay = shared.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let reply = execute(&shared, &args);
        if write.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn execute(shared: &Shared, args: &[Vec<u8>]) -> Vec<u8> {
    let mut text: Vec<String> = args.iter().map(|a| String::from_utf8_lossy(a).into_owned()).collect();
    text[0] = text[0].to_uppercase();
    shared.log.lock().unwrap().push(text.clone());

    let mut data = shared.data.lock().unwrap();
    match text[0].as_str() {
        "PING" => b"+PONG\r\n".to_vec(),
        "GET" => match data.get(&text[1]) {
            Some(value) => bulk(value),
            None => b"$-1\r\n".to_vec(),
        },
        "SET" => {
            data.insert(text[1].clone(), args[2].clone());
            b"+OK\r\n".to_vec()
        }
        "SETEX" => {
            data.insert(text[1].clone(), args[3].clone());
            b"+OK\r\n".to_vec()
        }
        "DEL" => {
            let removed = text[1..].iter().filter(|k| data.remove(*k).is_some()).count();
            format!(":{}\r\n", removed).into_bytes()
        }
        "SCAN" => {
            let pattern = text
                .iter()
                .position(|a| a.eq_ignore_ascii_case("MATCH"))
                .and_then(|i| text.get(i + 1))
                .map_or("*", String::as_str);
            let mut keys: Vec<&String> = data
                .keys()
                .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
                .collect();
            keys.sort();

            let mut reply = format!("*2\r\n$1\r\n0\r\n*{}\r\n", keys.len()).into_bytes();
            for key in keys {
                reply.extend(bulk(key.as_bytes()));
            }
            reply
        }
        "PUBLISH" => b":0\r\n".to_vec(),
        _ => b"+OK\r\n".to_vec(),
    }
}

fn bulk(value: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", value.len()).into_bytes();
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
    out
}

async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<Vec<u8>>> {
    let count: usize = read_line(reader).await?.strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len: usize = read_line(reader).await?.strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(buf);
    }
    (!args.is_empty()).then_some(args)
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<String> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    Some(line.trim_end().to_string())
}

/// Redis glob subset: `*`, `?` and backslash escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'\\', [escaped, rest @ ..])) => {
            text.first() == Some(escaped) && glob_match(rest, &text[1..])
        }
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"p:site:*", b"p:site:acme"));
        assert!(glob_match(b"a\\*b:*", b"a*b:page"));
        assert!(!glob_match(b"a\\*b:*", b"aXb:page"));
        assert!(glob_match(b"a?c", b"abc"));
        assert!(!glob_match(b"abc", b"abcd"));
    }
}
