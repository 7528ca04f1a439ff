//! Message framing on the byte stream.
//!
//! The runtime speaks LSP-style `Content-Length` framing by default. Newline
//! delimited JSON is also supported for runtimes and test doubles that use it.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body (64 MiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// How frames are delimited on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// `Content-Length: N\r\n\r\n` header followed by `N` bytes of JSON.
    #[default]
    ContentLength,
    /// One JSON document per line.
    Lines,
}

impl Framing {
    /// Read one frame body.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub async fn read_frame<R>(&self, reader: &mut R) -> io::Result<Option<String>>
    where
        R: AsyncBufRead + Unpin,
    {
        match self {
            Self::ContentLength => read_content_length_frame(reader).await,
            Self::Lines => read_line_frame(reader).await,
        }
    }

    /// Encode a JSON body into its on-wire bytes.
    pub fn encode(&self, body: &str) -> Vec<u8> {
        match self {
            Self::ContentLength => {
                let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
                out.extend_from_slice(body.as_bytes());
                out
            }
            Self::Lines => {
                let mut out = Vec::with_capacity(body.len() + 1);
                out.extend_from_slice(body.as_bytes());
                out.push(b'\n');
                out
            }
        }
    }

    /// Encode and write one frame, flushing afterwards.
    pub async fn write_frame<W>(&self, writer: &mut W, body: &str) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer.write_all(&self.encode(body)).await?;
        writer.flush().await
    }
}

async fn read_content_length_frame<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                ));
            }
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            // Blank line between frames.
            continue;
        }
        saw_header = true;

        let Some((name, value)) = trimmed.split_once(':') else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed frame header: {trimmed}"),
            ));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let len = value.trim().parse::<usize>().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid Content-Length '{}': {e}", value.trim()),
                )
            })?;
            content_length = Some(len);
        }
        // Other headers (Content-Type) carry nothing we need.
    }

    let len = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "frame without Content-Length")
    })?;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    String::from_utf8(body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn read_line_frame<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
}
