//! The Write Serializer: a mutual-exclusion guard around a socket's write
//! half so that negotiation replies and outbound user bytes never interleave
//! mid-write. One logical write per critical section; no buffering, no
//! fairness guarantee between competing writers.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

pub struct WriteSerializer<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for WriteSerializer<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin> WriteSerializer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Writes `buf` as a single logical frame. The lock is held for the
    /// whole call, so a competing writer can never observe a partial frame.
    pub async fn write_all(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.write_all(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn serializes_concurrent_writers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (server, mut client) = tokio::join!(
            async { listener.accept().await.unwrap().0 },
            async { tokio::net::TcpStream::connect(addr).await.unwrap() }
        );

        let writer = WriteSerializer::new(server);
        let a = writer.clone();
        let b = writer.clone();

        let (ra, rb) = tokio::join!(a.write_all(&[1u8; 16]), b.write_all(&[2u8; 16]));
        ra.unwrap();
        rb.unwrap();

        let mut buf = [0u8; 32];
        client.read_exact(&mut buf).await.unwrap();
        // Each writer's frame is contiguous: either sixteen 1s then sixteen
        // 2s, or the reverse, never interleaved.
        assert!(buf[..16] == [1u8; 16] || buf[..16] == [2u8; 16]);
        let other = if buf[0] == 1 { 2u8 } else { 1u8 };
        assert_eq!(buf[16..], [other; 16]);
    }
}
