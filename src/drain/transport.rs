use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

/// A connected wire to the syslog collector. Each call ships one complete
/// packet; implementations own whatever framing the protocol needs.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, packet: &[u8]) -> io::Result<()>;
}

/// Fire-and-forget datagrams. Clones share one socket, which is safe
/// because each datagram is self-framing.
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn connect(addr: &str) -> io::Result<UdpTransport> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;

        Ok(UdpTransport {
            socket: Arc::new(socket),
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        self.socket.send(packet).await?;
        Ok(())
    }
}

/// Newline-delimited packets over one persistent stream.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub async fn connect(addr: &str) -> io::Result<TcpTransport> {
        Ok(TcpTransport {
            stream: TcpStream::connect(addr).await?,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        self.stream.write_all(packet).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        Ok(())
    }
}
