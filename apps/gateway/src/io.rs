//! Stream plumbing shared by the tunnel and SOCKS5 paths

use bytes::{Buf, Bytes};
use mesh_sidecar_common::constants::PIPE_BUFFER_BYTES;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};

/// A stream that yields already-buffered bytes before reading from `inner`
///
/// The front door reads a request head before deciding who owns the
/// connection; this hands those bytes back to whichever path takes over.
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(inner: S, prefix: Bytes) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.prefix.has_remaining() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Outcome of one direction of a [`pipe`]
pub type CopyResult = io::Result<u64>;

/// Relay bytes both ways until both directions finish
///
/// Each direction copies until its source reaches end-of-stream, then shuts
/// down the write half of its destination so the far side sees EOF. A failure
/// in one direction does not stop the other. Returns `(a_to_b, b_to_a)`.
pub async fn pipe<A, B>(a: A, b: B) -> (CopyResult, CopyResult)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    tokio::join!(
        copy_then_close(&mut a_read, &mut b_write),
        copy_then_close(&mut b_read, &mut a_write),
    )
}

async fn copy_then_close<R, W>(reader: &mut R, writer: &mut W) -> CopyResult
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::with_capacity(PIPE_BUFFER_BYTES, reader);
    let copied = tokio::io::copy_buf(&mut reader, writer).await;
    // peer may already be gone
    let _ = writer.shutdown().await;
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    #[tokio::test]
    async fn test_rewind_replays_prefix_first() {
        let (client, mut server) = duplex(64);
        server.write_all(b" world").await.unwrap();
        drop(server);

        let mut stream = Rewind::new(client, Bytes::from_static(b"hello"));
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_rewind_small_reads() {
        let (client, server) = duplex(64);
        drop(server);

        let mut stream = Rewind::new(client, Bytes::from_static(b"abcdef"));
        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_pipe_propagates_half_close() {
        let (client, client_far) = duplex(1024);
        let (target, target_far) = duplex(1024);

        let relay = tokio::spawn(async move { pipe(client_far, target_far).await });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut target_read, mut target_write) = tokio::io::split(target);

        // client finishes sending, target still answers afterwards
        client_write.write_all(b"request").await.unwrap();
        client_write.shutdown().await.unwrap();

        let mut received = Vec::new();
        target_read.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"request");

        target_write.write_all(b"late response").await.unwrap();
        target_write.shutdown().await.unwrap();

        let mut answered = Vec::new();
        client_read.read_to_end(&mut answered).await.unwrap();
        assert_eq!(answered, b"late response");

        let (up, down) = relay.await.unwrap();
        assert_eq!(up.unwrap(), 7);
        assert_eq!(down.unwrap(), 13);
    }
}
