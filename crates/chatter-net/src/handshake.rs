//! Identity handshake.
//!
//! Immediately after accept the relay writes the new identity as one UTF-8
//! line terminated by `\n`. The connecting side reads that line before it
//! sends anything. Bytes that arrive behind the line stay in the read buffer
//! and become the start of the framed stream.

use std::io;
use std::time::Duration;

use chatter_core::ConnectionId;
use chatter_core::constants::MAX_HANDSHAKE_LINE;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::errors::ConnectError;

/// Codec for the identity line.
pub fn line_codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_HANDSHAKE_LINE)
}

/// Write `id` followed by `\n`, bounded by `timeout`.
pub async fn write_identity<W>(writer: &mut W, id: &ConnectionId, timeout: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = format!("{id}\n");
    let write = async {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    };
    tokio::time::timeout(timeout, write)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "identity write timed out"))?
}

/// Read the identity line, bounded by `timeout`.
pub async fn read_identity<R>(
    lines: &mut FramedRead<R, LinesCodec>,
    timeout: Duration,
) -> Result<ConnectionId, ConnectError>
where
    R: AsyncRead + Unpin,
{
    let next = tokio::time::timeout(timeout, lines.next())
        .await
        .map_err(|_| ConnectError::HandshakeTimeout(timeout))?;

    match next {
        None => Err(ConnectError::Closed),
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => Err(ConnectError::InvalidHandshake(
            format!("identity line longer than {MAX_HANDSHAKE_LINE} bytes"),
        )),
        Some(Err(LinesCodecError::Io(err))) => Err(ConnectError::Io(err)),
        Some(Ok(line)) => {
            let token = line.trim();
            if token.is_empty() {
                return Err(ConnectError::InvalidHandshake("empty identity".into()));
            }
            Ok(ConnectionId::from_string(token.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn writes_line_terminated_identity() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let id = ConnectionId::from("abc-123");
        write_identity(&mut a, &id, Duration::from_secs(1)).await.unwrap();
        drop(a);
        let mut got = String::new();
        let _ = b.read_to_string(&mut got).await.unwrap();
        assert_eq!(got, "abc-123\n");
    }

    #[tokio::test]
    async fn reads_identity_line() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"abc-123\r\n").await.unwrap();
        let mut lines = FramedRead::new(b, line_codec());
        let id = read_identity(&mut lines, Duration::from_secs(1)).await.unwrap();
        assert_eq!(id.as_str(), "abc-123");
    }

    #[tokio::test]
    async fn keeps_bytes_after_the_line() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"id-1\n\x00\x00\x00\x01\x00").await.unwrap();
        drop(a);
        let mut lines = FramedRead::new(b, line_codec());
        let _ = read_identity(&mut lines, Duration::from_secs(1)).await.unwrap();

        let mut frames = lines.map_decoder(|_| chatter_core::frame_codec(1024));
        let frame = frames.next().await.unwrap().unwrap();
        assert_eq!(&frame[..], &[0x00]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (_a, b) = tokio::io::duplex(64);
        let mut lines = FramedRead::new(b, line_codec());
        let err = read_identity(&mut lines, Duration::from_secs(5)).await.unwrap_err();
        assert_matches!(err, ConnectError::HandshakeTimeout(d) if d == Duration::from_secs(5));
    }

    #[tokio::test]
    async fn eof_before_line_is_closed() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut lines = FramedRead::new(b, line_codec());
        let err = read_identity(&mut lines, Duration::from_secs(1)).await.unwrap_err();
        assert_matches!(err, ConnectError::Closed);
    }

    #[tokio::test]
    async fn blank_line_is_invalid() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"   \n").await.unwrap();
        let mut lines = FramedRead::new(b, line_codec());
        let err = read_identity(&mut lines, Duration::from_secs(1)).await.unwrap_err();
        assert_matches!(err, ConnectError::InvalidHandshake(_));
    }

    #[tokio::test]
    async fn overlong_line_is_invalid() {
        let (mut a, b) = tokio::io::duplex(1024);
        a.write_all(&[b'x'; MAX_HANDSHAKE_LINE + 10]).await.unwrap();
        a.write_all(b"\n").await.unwrap();
        let mut lines = FramedRead::new(b, line_codec());
        let err = read_identity(&mut lines, Duration::from_secs(1)).await.unwrap_err();
        assert_matches!(err, ConnectError::InvalidHandshake(_));
    }
}
