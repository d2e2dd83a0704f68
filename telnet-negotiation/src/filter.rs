//! The inbound Telnet Negotiation Filter: decodes the backend→client stream,
//! auto-replies to option negotiation with a neutral refusal, and strips
//! subnegotiation payloads entirely.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::protocol::{TelnetCommand, IAC};
use crate::writer::WriteSerializer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    SawIac,
    AwaitingOptionCode(u8),
    InSubnegotiation,
    InSubnegotiationSawIac,
}

/// Byte-by-byte state machine, one instance per session, owned solely by the
/// reader task. State survives across reads so a negotiation sequence split
/// at any socket boundary decodes identically to one delivered whole.
pub struct NegotiationFilter {
    state: State,
}

impl Default for NegotiationFilter {
    fn default() -> Self {
        Self { state: State::Data }
    }
}

impl NegotiationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one chunk of raw backend bytes, returning the application
    /// bytes it contains and writing any negotiation replies synchronously
    /// through `replies` before returning.
    pub async fn decode<W>(
        &mut self,
        input: &[u8],
        replies: &WriteSerializer<W>,
    ) -> std::io::Result<Vec<u8>>
    where
        W: AsyncWrite + Unpin,
    {
        let mut out = Vec::with_capacity(input.len());
        for &byte in input {
            match self.state {
                State::Data => {
                    if byte == IAC {
                        self.state = State::SawIac;
                    } else {
                        out.push(byte);
                    }
                }
                State::SawIac => {
                    if byte == IAC {
                        out.push(IAC);
                        self.state = State::Data;
                    } else if byte == TelnetCommand::SB.to_byte() {
                        self.state = State::InSubnegotiation;
                    } else if TelnetCommand::from_byte(byte)
                        .map(TelnetCommand::is_negotiation_verb)
                        .unwrap_or(false)
                    {
                        self.state = State::AwaitingOptionCode(byte);
                    } else {
                        self.state = State::Data;
                    }
                }
                State::AwaitingOptionCode(verb) => {
                    if let Some(reply) = neutral_reply(verb, byte) {
                        replies.write_all(&reply).await?;
                    }
                    self.state = State::Data;
                }
                State::InSubnegotiation => {
                    if byte == IAC {
                        self.state = State::InSubnegotiationSawIac;
                    }
                }
                State::InSubnegotiationSawIac => {
                    if byte == TelnetCommand::SE.to_byte() {
                        self.state = State::Data;
                    } else {
                        // Either a literal escaped IAC or any other byte:
                        // both resume discarding the subnegotiation payload.
                        self.state = State::InSubnegotiation;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Reads from `reader` and decodes until at least one application byte
    /// is produced or the read side reaches EOF/error. A read that yields
    /// only negotiation traffic does not return to the caller empty-handed;
    /// looping here instead of at the call site avoids a tight idle loop
    /// when a read produces nothing but negotiation bytes.
    pub async fn read_application_bytes<R, W>(
        &mut self,
        reader: &mut R,
        replies: &WriteSerializer<W>,
    ) -> std::io::Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = [0u8; 4096];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(Vec::new()); // EOF
            }
            let decoded = self.decode(&buf[..n], replies).await?;
            if !decoded.is_empty() {
                return Ok(decoded);
            }
        }
    }
}

/// `IAC DO x` -> `IAC WONT x`; `IAC WILL x` -> `IAC DONT x`;
/// `IAC DONT x` and `IAC WONT x` draw no reply.
fn neutral_reply(verb: u8, option: u8) -> Option<[u8; 3]> {
    match TelnetCommand::from_byte(verb) {
        Some(TelnetCommand::DO) => Some([IAC, TelnetCommand::WONT.to_byte(), option]),
        Some(TelnetCommand::WILL) => Some([IAC, TelnetCommand::DONT.to_byte(), option]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sink() -> (WriteSerializer<tokio::net::TcpStream>, tokio::net::TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (server, client) = tokio::join!(
            async { listener.accept().await.unwrap().0 },
            async { tokio::net::TcpStream::connect(addr).await.unwrap() }
        );
        (WriteSerializer::new(server), client)
    }

    async fn read_some(client: &mut tokio::net::TcpStream, n: usize) -> Vec<u8> {
        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; n];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn s1_pass_through() {
        let (replies, _client) = sink().await;
        let mut filter = NegotiationFilter::new();
        let out = filter
            .decode(b"Hello", &replies)
            .await
            .unwrap();
        assert_eq!(out, b"Hello");
    }

    #[tokio::test]
    async fn s2_do_option_replies_wont() {
        let (replies, mut client) = sink().await;
        let mut filter = NegotiationFilter::new();
        let out = filter
            .decode(&[0xFF, 0xFD, 0x18], &replies)
            .await
            .unwrap();
        assert!(out.is_empty());
        let reply = read_some(&mut client, 3).await;
        assert_eq!(reply, vec![0xFF, 0xFC, 0x18]);
    }

    #[tokio::test]
    async fn s3_escaped_iac_inbound() {
        let (replies, _client) = sink().await;
        let mut filter = NegotiationFilter::new();
        let out = filter
            .decode(&[0x41, 0xFF, 0xFF, 0x42], &replies)
            .await
            .unwrap();
        assert_eq!(out, vec![0x41, 0xFF, 0x42]);
    }

    #[tokio::test]
    async fn s4_subnegotiation_ignored() {
        let (replies, _client) = sink().await;
        let mut filter = NegotiationFilter::new();
        let out = filter
            .decode(
                &[0xFF, 0xFA, 0x18, 0x00, b'X', b'T', 0xFF, 0xF0, 0x43],
                &replies,
            )
            .await
            .unwrap();
        assert_eq!(out, vec![0x43]);
    }

    #[tokio::test]
    async fn s5_split_negotiation() {
        let (replies, mut client) = sink().await;
        let mut filter = NegotiationFilter::new();
        let out1 = filter.decode(&[0xFF], &replies).await.unwrap();
        assert!(out1.is_empty());
        let out2 = filter.decode(&[0xFB, 0x01], &replies).await.unwrap();
        assert!(out2.is_empty());
        let reply = read_some(&mut client, 3).await;
        assert_eq!(reply, vec![0xFF, 0xFE, 0x01]);
    }

    #[tokio::test]
    async fn dont_and_wont_draw_no_reply() {
        let (replies, _client) = sink().await;
        let mut filter = NegotiationFilter::new();
        filter
            .decode(&[0xFF, 0xFE, 0x01, 0xFF, 0xFC, 0x01], &replies)
            .await
            .unwrap();
        // No bytes were written to the sink; dropping `replies` without a
        // read on the other end would hang only if something was sent.
    }

    #[tokio::test]
    async fn unknown_command_verbs_are_silently_dropped() {
        let (replies, _client) = sink().await;
        let mut filter = NegotiationFilter::new();
        // IAC GA (go-ahead) followed by application data.
        let out = filter
            .decode(&[0xFF, TelnetCommand::GA.to_byte(), b'x'], &replies)
            .await
            .unwrap();
        assert_eq!(out, vec![b'x']);
    }

    #[tokio::test]
    async fn malformed_subnegotiation_iac_iac_stays_in_sb() {
        let (replies, _client) = sink().await;
        let mut filter = NegotiationFilter::new();
        // SB, a doubled IAC inside the payload, more payload, then SE.
        let out = filter
            .decode(
                &[0xFF, 0xFA, 0x18, 0xFF, 0xFF, b'z', 0xFF, 0xF0, b'k'],
                &replies,
            )
            .await
            .unwrap();
        assert_eq!(out, vec![b'k']);
    }
}
