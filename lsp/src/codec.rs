//! `Content-Length` framing for JSON-RPC over the server's stdio.
//!
//! Each message is `Content-Length: N\r\n[other headers]\r\n\r\n` followed by
//! exactly `N` bytes of UTF-8 JSON.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single message body. Steep publishes whole-file
/// diagnostics, so this is generous.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

/// Reads framed JSON messages from an async reader.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next message.
    ///
    /// `Ok(None)` means the stream ended cleanly between messages.
    pub async fn next_message(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(len) = self.read_header_block().await? else {
            return Ok(None);
        };
        if len > MAX_BODY_BYTES {
            bail!("message of {len} bytes exceeds the {MAX_BODY_BYTES} byte limit");
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading message body")?;
        let value = serde_json::from_slice(&body).context("decoding message body")?;
        Ok(Some(value))
    }

    async fn read_header_block(&mut self) -> Result<Option<usize>> {
        let mut len = None;
        let mut started = false;

        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .await
                .context("reading header line")?;
            if read == 0 {
                if started {
                    bail!("stream ended inside a header block");
                }
                return Ok(None);
            }
            started = true;

            let header = self.line.trim();
            if header.is_empty() {
                break;
            }
            if let Some(value) = content_length(header)? {
                len = Some(value);
            }
        }

        len.map(Some).context("header block has no Content-Length")
    }
}

/// Value of a `Content-Length` header line, `None` for any other header.
fn content_length(header: &str) -> Result<Option<usize>> {
    let Some((name, value)) = header.split_once(':') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    let len = value
        .trim()
        .parse()
        .with_context(|| format!("bad Content-Length `{}`", value.trim()))?;
    Ok(Some(len))
}

/// Writes framed JSON messages to an async writer.
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send(&mut self, message: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(message).context("encoding message")?;
        let mut frame = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);

        self.writer
            .write_all(&frame)
            .await
            .context("writing message")?;
        self.writer.flush().await.context("flushing message")?;
        Ok(())
    }
}
