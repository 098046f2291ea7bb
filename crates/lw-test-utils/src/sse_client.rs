use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// One parsed SSE event: `event:` name, joined `data:` payload, optional `id:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// A minimal SSE client over a raw TCP connection.
///
/// Speaks just enough HTTP/1.1 to issue the GET, read the response head and
/// decode a chunked (or unframed) body into a stream of SSE event blocks.
pub struct SseClient {
    reader: BufReader<TcpStream>,
    status: u16,
    headers: Vec<(String, String)>,
    chunked: bool,
    chunk_remaining: usize,
    decoded: Vec<u8>,
}

impl SseClient {
    /// Connect and issue `GET {path_and_query}` with the given extra headers.
    ///
    /// Returns once the response head has been read; check [`status`] before
    /// calling [`next_event`].
    pub async fn connect(
        addr: SocketAddr,
        path_and_query: &str,
        extra_headers: &[(&str, &str)],
    ) -> std::io::Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let mut request = format!(
            "GET {path_and_query} HTTP/1.1\r\nHost: {addr}\r\nAccept: text/event-stream\r\n"
        );
        for (name, value) in extra_headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let status_line = read_crlf_line(&mut reader).await?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("malformed status line: {status_line}"),
                )
            })?;

        let mut headers = Vec::new();
        loop {
            let line = read_crlf_line(&mut reader).await?;
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
            }
        }
        let chunked = headers
            .iter()
            .any(|(name, value)| name == "transfer-encoding" && value.contains("chunked"));

        Ok(Self {
            reader,
            status,
            headers,
            chunked,
            chunk_remaining: 0,
            decoded: Vec::new(),
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(header, _)| *header == name)
            .map(|(_, value)| value.as_str())
    }

    /// Read the next SSE event, however long it takes.
    pub async fn next_event(&mut self) -> std::io::Result<SseEvent> {
        loop {
            if let Some(block) = take_event_block(&mut self.decoded) {
                if let Some(event) = parse_event_block(&block) {
                    return Ok(event);
                }
                // Comment-only block; keep reading.
                continue;
            }
            self.fill().await?;
        }
    }

    /// Read the next SSE event, failing after `timeout`.
    pub async fn next_event_timeout(&mut self, timeout: Duration) -> std::io::Result<SseEvent> {
        tokio::time::timeout(timeout, self.next_event())
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "no SSE event within timeout")
            })?
    }

    /// Skip events until one with the given name arrives.
    pub async fn next_event_of(
        &mut self,
        name: &str,
        timeout: Duration,
    ) -> std::io::Result<SseEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no `{name}` event within timeout"),
                    )
                })?;
            let event = self.next_event_timeout(remaining).await?;
            if event.event == name {
                return Ok(event);
            }
        }
    }

    /// Pull more decoded body bytes from the socket.
    async fn fill(&mut self) -> std::io::Result<()> {
        if !self.chunked {
            let mut buf = [0u8; 4096];
            let n = self.reader.read(&mut buf).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            self.decoded.extend_from_slice(&buf[..n]);
            return Ok(());
        }

        if self.chunk_remaining == 0 {
            let size_line = read_crlf_line(&mut self.reader).await?;
            let size_field = size_line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_field, 16).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("bad chunk size: {size_line}"),
                )
            })?;
            if size == 0 {
                // Final chunk; trailer section ends the stream.
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            self.chunk_remaining = size;
        }

        let mut buf = vec![0u8; self.chunk_remaining.min(4096)];
        let n = self.reader.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        self.decoded.extend_from_slice(&buf[..n]);
        self.chunk_remaining -= n;
        if self.chunk_remaining == 0 {
            // Consume the CRLF that terminates the chunk.
            let mut crlf = [0u8; 2];
            self.reader.read_exact(&mut crlf).await?;
        }
        Ok(())
    }
}

async fn read_crlf_line(reader: &mut BufReader<TcpStream>) -> std::io::Result<String> {
    let mut line = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-UTF-8 line"))
}

/// Remove and return the first complete event block (terminated by a blank
/// line) from `buf`, or `None` if no terminator has arrived yet.
fn take_event_block(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let terminator = buf.windows(2).position(|w| w == b"\n\n")?;
    let block: Vec<u8> = buf.drain(..terminator + 2).collect();
    Some(block[..terminator].to_vec())
}

fn parse_event_block(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    let mut event = String::new();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut id = None;
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim_start().to_owned();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("id:") {
            id = Some(value.trim_start().to_owned());
        }
    }
    if event.is_empty() && data_lines.is_empty() && id.is_none() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
        id,
    })
}
