/**
 * MEMCACHED - Client minimal du protocole texte memcached
 *
 * RÔLE : Implémentation production du trait Cache. Couvre uniquement les
 * commandes utilisées par le système : get, set (avec exptime), delete et
 * version (ping de démarrage).
 *
 * FONCTIONNEMENT : Une connexion TCP unique protégée par un Mutex tokio,
 * reconnectée paresseusement après erreur. Le moteur traite les messages
 * un par un, une connexion suffit.
 */

use super::Cache;
use crate::error::CacheError;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

type Conn = BufStream<TcpStream>;

pub struct MemcachedCache {
    addr: String,
    conn: Mutex<Option<Conn>>,
}

impl MemcachedCache {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    /// Connexion établie du slot verrouillé, reconnectée si nécessaire.
    /// En cas d'erreur ultérieure l'appelant remet le slot à None ; la
    /// prochaine opération reconnectera.
    async fn connected<'a>(
        &self,
        slot: &'a mut Option<Conn>,
    ) -> Result<&'a mut Conn, CacheError> {
        if slot.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            *slot = Some(BufStream::new(stream));
        }
        match slot.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(CacheError::Protocol("connection unavailable".into())),
        }
    }
}

async fn read_line(conn: &mut Conn) -> Result<String, CacheError> {
    let mut line = String::new();
    let n = conn.read_line(&mut line).await?;
    if n == 0 {
        return Err(CacheError::Protocol("connection closed by server".into()));
    }
    Ok(line.trim_end().to_string())
}

async fn io_get(conn: &mut Conn, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    conn.write_all(format!("get {key}\r\n").as_bytes()).await?;
    conn.flush().await?;
    let header = read_line(conn).await?;
    if header == "END" {
        return Ok(None);
    }
    // "VALUE <key> <flags> <bytes>"
    let len: usize = header
        .strip_prefix("VALUE ")
        .and_then(|rest| rest.split_whitespace().nth(2))
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| CacheError::Protocol(format!("unexpected reply: {header}")))?;
    let mut value = vec![0u8; len + 2]; // données + \r\n
    conn.read_exact(&mut value).await?;
    value.truncate(len);
    let trailer = read_line(conn).await?;
    if trailer != "END" {
        return Err(CacheError::Protocol(format!("missing END, got: {trailer}")));
    }
    Ok(Some(value))
}

async fn io_set(conn: &mut Conn, key: &str, value: &[u8], exptime: u64) -> Result<(), CacheError> {
    let header = format!("set {key} 0 {exptime} {}\r\n", value.len());
    conn.write_all(header.as_bytes()).await?;
    conn.write_all(value).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;
    let reply = read_line(conn).await?;
    if reply != "STORED" {
        return Err(CacheError::Protocol(format!("set failed: {reply}")));
    }
    Ok(())
}

async fn io_delete(conn: &mut Conn, key: &str) -> Result<(), CacheError> {
    conn.write_all(format!("delete {key}\r\n").as_bytes())
        .await?;
    conn.flush().await?;
    // NOT_FOUND n'est pas une erreur : delete est idempotent.
    let reply = read_line(conn).await?;
    if reply != "DELETED" && reply != "NOT_FOUND" {
        return Err(CacheError::Protocol(format!("delete failed: {reply}")));
    }
    Ok(())
}

async fn io_version(conn: &mut Conn) -> Result<(), CacheError> {
    conn.write_all(b"version\r\n").await?;
    conn.flush().await?;
    let reply = read_line(conn).await?;
    if !reply.starts_with("VERSION") {
        return Err(CacheError::Protocol(format!("unexpected reply: {reply}")));
    }
    Ok(())
}

fn check_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() || key.len() > 250 || key.bytes().any(|b| b <= b' ') {
        return Err(CacheError::Protocol(format!("invalid key: {key:?}")));
    }
    Ok(())
}

#[async_trait]
impl Cache for MemcachedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        check_key(key)?;
        let mut guard = self.conn.lock().await;
        let conn = self.connected(&mut guard).await?;
        let result = io_get(conn, key).await;
        if result.is_err() {
            *guard = None;
        }
        result
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<(), CacheError> {
        check_key(key)?;
        let mut guard = self.conn.lock().await;
        let conn = self.connected(&mut guard).await?;
        let result = io_set(conn, key, value, ttl.unwrap_or(0)).await;
        if result.is_err() {
            *guard = None;
        }
        result
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        check_key(key)?;
        let mut guard = self.conn.lock().await;
        let conn = self.connected(&mut guard).await?;
        let result = io_delete(conn, key).await;
        if result.is_err() {
            *guard = None;
        }
        result
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut guard = self.conn.lock().await;
        let conn = self.connected(&mut guard).await?;
        let result = io_version(conn).await;
        if result.is_err() {
            *guard = None;
        }
        result
    }
}
