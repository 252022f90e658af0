//! Raw NMEA over TCP, one sentence per line.

use crate::connector::{FrameStream, Upstream};
use crate::error::ConnectionError;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::warn;

/// Longest line accepted before the codec discards it.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Lines codec that reports oversized lines as `None` instead of failing.
///
/// `FramedRead` ends the stream after a decoder error, so the length limit
/// is turned into a skipped item and the session keeps going.
#[derive(Debug)]
pub struct SentenceLines {
    inner: LinesCodec,
}

impl SentenceLines {
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn tolerate(
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Option<String>>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(Some)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(None)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for SentenceLines {
    type Item = Option<String>;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Self::tolerate(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Self::tolerate(self.inner.decode_eof(buf))
    }
}

/// A TCP endpoint emitting newline-delimited AIVDM/AIVDO sentences.
#[derive(Debug, Clone)]
pub struct TcpUpstream {
    host: String,
    port: u16,
    max_line_length: usize,
}

impl TcpUpstream {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

#[async_trait]
impl Upstream for TcpUpstream {
    fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> Result<FrameStream, ConnectionError> {
        let socket = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let lines = FramedRead::new(socket, SentenceLines::new(self.max_line_length));

        let frames = lines.filter_map(|line| async move {
            match line {
                Ok(Some(line)) => Some(Ok(line)),
                Ok(None) => {
                    warn!("discarding line longer than {MAX_LINE_LENGTH} bytes");
                    None
                }
                Err(LinesCodecError::Io(e)) => Some(Err(ConnectionError::Io(e))),
                Err(LinesCodecError::MaxLineLengthExceeded) => None,
            }
        });
        Ok(frames.boxed())
    }
}
