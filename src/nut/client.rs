use crate::models::{DeviceRegistry, RawTelemetry};
use crate::nut::{LinkEvent, NutError, TelemetrySource};
use log::{debug, error, info};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn read_reply(&mut self) -> Result<String, NutError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(NutError::Closed);
        }

        let trimmed = line.trim();
        if let Some(code) = trimmed.strip_prefix("ERR ") {
            return Err(NutError::Server(code.to_string()));
        }
        Ok(trimmed.to_string())
    }

    /// Send a command that is answered by a single `OK` line
    async fn simple(&mut self, command: &str) -> Result<(), NutError> {
        self.writer.write_all(format!("{command}\n").as_bytes()).await?;
        let reply = self.read_reply().await?;
        if !reply.starts_with("OK") {
            return Err(NutError::Protocol(reply));
        }
        Ok(())
    }

    /// Send a `LIST ...` command and collect the lines between BEGIN and END
    async fn list(&mut self, command: &str) -> Result<Vec<String>, NutError> {
        self.writer.write_all(format!("{command}\n").as_bytes()).await?;

        let begin = format!("BEGIN {command}");
        let end = format!("END {command}");

        let first = self.read_reply().await?;
        if first != begin {
            return Err(NutError::Protocol(first));
        }

        let mut lines = Vec::new();
        loop {
            let line = self.read_reply().await?;
            if line == end {
                break;
            }
            lines.push(line);
        }
        Ok(lines)
    }
}

/// Client for the NUT network protocol on a single persistent connection
pub struct NutClient {
    addr: String,
    credentials: Option<(String, String)>,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
    events: UnboundedSender<LinkEvent>,
}

impl NutClient {
    pub fn new(host: &str, port: u16, events: UnboundedSender<LinkEvent>) -> Self {
        return NutClient {
            addr: format!("{host}:{port}"),
            credentials: None,
            timeout: Duration::from_secs(10),
            conn: Mutex::new(None),
            events,
        };
    }

    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn emit(&self, event: LinkEvent) {
        /* Nobody listening any more means we are shutting down */
        let _ = self.events.send(event);
    }

    fn connection_lost(&self, reason: String) {
        self.emit(LinkEvent::Error(reason));
        self.emit(LinkEvent::Close);
    }

    async fn open(&self) -> Result<Connection, NutError> {
        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(NutError::Connect { addr: self.addr.clone(), source: e }),
            Err(_) => return Err(NutError::Timeout(self.timeout)),
        };
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        let mut conn = Connection { reader: BufReader::new(reader), writer };

        if let Some((username, password)) = &self.credentials {
            let login = async {
                conn.simple(&format!("USERNAME {username}")).await?;
                conn.simple(&format!("PASSWORD {password}")).await
            };
            match tokio::time::timeout(self.timeout, login).await {
                Ok(result) => result?,
                Err(_) => return Err(NutError::Timeout(self.timeout)),
            }
        }

        Ok(conn)
    }

    async fn request(&self, command: String) -> Result<Vec<String>, NutError> {
        let mut guard = self.conn.lock().await;
        /* The connection stays out of the slot until the exchange completed */
        let mut conn = guard.take().ok_or(NutError::NotConnected)?;
        let mut exchange = Exchange { client: self, finished: false };

        debug!("[{}] -> {command}", self.addr);
        let result = match tokio::time::timeout(self.timeout, conn.list(&command)).await {
            Ok(result) => result,
            Err(_) => Err(NutError::Timeout(self.timeout)),
        };
        exchange.finished = true;

        match &result {
            Err(e) if e.drops_connection() => {
                /* The stream may be half way through a reply, it can not be reused */
                drop(guard);
                error!("[{}] Connection lost: {e}", self.addr);
                self.connection_lost(e.to_string());
            }
            _ => *guard = Some(conn),
        }
        result
    }
}

/// Reports the link as lost when a request is dropped before its reply was read
struct Exchange<'a> {
    client: &'a NutClient,
    finished: bool,
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if !self.finished {
            error!("[{}] Request abandoned mid reply, dropping connection", self.client.addr);
            self.client.connection_lost("request abandoned mid reply".to_string());
        }
    }
}

impl TelemetrySource for NutClient {
    async fn connect(&self) {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            self.emit(LinkEvent::Ready);
            return;
        }

        info!("Connecting to NUT server at {}", self.addr);
        match self.open().await {
            Ok(conn) => {
                *guard = Some(conn);
                self.emit(LinkEvent::Ready);
            }
            Err(e) => {
                self.connection_lost(e.to_string());
            }
        }
    }

    async fn list_devices(&self) -> Result<DeviceRegistry, NutError> {
        let lines = self.request("LIST UPS".to_string()).await?;

        let mut devices = DeviceRegistry::new();
        for line in lines {
            match parse_ups_line(&line) {
                Some((name, description)) => {
                    devices.insert(name, description);
                }
                None => debug!("[{}] Ignoring UPS line {line:?}", self.addr),
            }
        }
        Ok(devices)
    }

    async fn get_variables(&self, key: &str) -> Result<RawTelemetry, NutError> {
        let lines = self.request(format!("LIST VAR {key}")).await?;

        let mut variables = RawTelemetry::new();
        for line in lines {
            match parse_var_line(&line) {
                Some((name, value)) => {
                    variables.insert(name, value);
                }
                None => debug!("[{}] Ignoring VAR line {line:?}", self.addr),
            }
        }
        Ok(variables)
    }
}

/// Parse `UPS <name> "<description>"`
pub fn parse_ups_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(3, ' ');
    if parts.next()? != "UPS" {
        return None;
    }
    let name = parts.next()?;
    let description = unquote(parts.next()?)?;
    Some((name.to_string(), description))
}

/// Parse `VAR <ups> <variable> "<value>"`
pub fn parse_var_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(4, ' ');
    if parts.next()? != "VAR" {
        return None;
    }
    let _ups = parts.next()?;
    let name = parts.next()?;
    let value = unquote(parts.next()?)?;
    Some((name.to_string(), value))
}

fn unquote(quoted: &str) -> Option<String> {
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next()?);
        } else {
            out.push(c);
        }
    }
    Some(out)
}
