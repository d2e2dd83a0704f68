//! Telnet protocol negotiation for a transparent SSH↔Telnet gateway.
//!
//! The gateway never enables a Telnet option: every `DO`/`WILL` offered by
//! the backend is answered with a neutral refusal (`WONT`/`DONT`), keeping
//! both peers in raw NVT mode. This is deliberately simpler than RFC 1143's
//! Q-Method, with no per-option enabled/disabled state to track, only a
//! one-shot reply per negotiation attempt.

pub mod filter;
pub mod protocol;
pub mod writer;

pub use filter::NegotiationFilter;
pub use protocol::{TelnetCommand, IAC};
pub use writer::WriteSerializer;

/// Doubles every IAC byte in `buf` and writes the result atomically through
/// `writer`, reporting the pre-escape length on success.
pub async fn write_escaped<W>(
    writer: &WriteSerializer<W>,
    buf: &[u8],
) -> std::io::Result<usize>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let iac_count = buf.iter().filter(|&&b| b == IAC).count();
    if iac_count == 0 {
        writer.write_all(buf).await?;
        return Ok(buf.len());
    }

    let mut escaped = Vec::with_capacity(buf.len() + iac_count);
    for &b in buf {
        escaped.push(b);
        if b == IAC {
            escaped.push(IAC);
        }
    }
    writer.write_all(&escaped).await?;
    Ok(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn pair() -> (tokio::net::TcpStream, tokio::net::TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accept, connect) = tokio::join!(listener.accept(), connect);
        (accept.unwrap().0, connect.unwrap())
    }

    #[tokio::test]
    async fn escape_round_trip() {
        let (server, mut client) = pair().await;
        let writer = WriteSerializer::new(server);
        let n = write_escaped(&writer, &[0x41, IAC, 0x42]).await.unwrap();
        assert_eq!(n, 3);

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x41, IAC, IAC, 0x42]);
    }

    #[tokio::test]
    async fn no_iac_passes_through_unescaped() {
        let (server, mut client) = pair().await;
        let writer = WriteSerializer::new(server);
        let n = write_escaped(&writer, b"hello").await.unwrap();
        assert_eq!(n, 5);

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }
}
