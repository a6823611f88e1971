//! TCP relay link.
//!
//! A [`RelayConnection`] owns a framed TCP stream split into a writer
//! task and a reader task, exposed to the caller as a pair of mpsc
//! channels.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::RelayCodec;
use crate::error::SheetError;
use crate::relay::RelayFrame;

const CHANNEL_CAPACITY: usize = 256;

pub type RelaySender = mpsc::Sender<RelayFrame>;

/// A framed relay link to one peer.
#[derive(Debug)]
pub struct RelayConnection {
    /// Frames to the background writer task.
    tx: mpsc::Sender<RelayFrame>,
    /// Frames from the background reader task.
    rx: mpsc::Receiver<RelayFrame>,
    peer: Option<SocketAddr>,
}

impl RelayConnection {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);
        let (mut net_writer, mut net_reader) = Framed::new(stream, RelayCodec).split();

        // caller -> network
        let (user_tx, mut network_rx) = mpsc::channel::<RelayFrame>(CHANNEL_CAPACITY);
        // network -> caller
        let (network_tx, user_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = network_rx.recv().await {
                if let Err(e) = net_writer.send(frame).await {
                    warn!(?peer, "relay link write error: {e}");
                    break;
                }
            }
            let _ = net_writer.close().await;
        });

        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(frame) => {
                        if network_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(?peer, "relay link read error: {e}");
                        break;
                    }
                }
            }
            debug!(?peer, "relay link reader finished");
        });

        Self {
            tx: user_tx,
            rx: user_rx,
            peer,
        }
    }

    /// Connect with a deadline.
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self, SheetError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SheetError::Timeout(timeout))??;
        Ok(Self::new(stream))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub async fn send(&self, frame: RelayFrame) -> Result<(), SheetError> {
        self.tx.send(frame).await?;
        Ok(())
    }

    /// Next inbound frame; `None` once the link is gone.
    pub async fn recv(&mut self) -> Option<RelayFrame> {
        self.rx.recv().await
    }

    pub fn sender(&self) -> RelaySender {
        self.tx.clone()
    }

    /// Split into the outbound sender and the inbound receiver.
    pub fn into_split(self) -> (RelaySender, mpsc::Receiver<RelayFrame>) {
        (self.tx, self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frames_cross_a_loopback_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = RelayConnection::new(stream);
            let frame = conn.recv().await.unwrap();
            conn.send(frame).await.unwrap();
            // keep the link open until the client has read the echo
            conn.recv().await
        });

        let mut client = RelayConnection::connect(addr, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(client.peer_addr().is_some());
        client
            .send(RelayFrame::Control(b"ping".to_vec()))
            .await
            .unwrap();
        let echoed = tokio::time::timeout(Duration::from_secs(2), client.recv())
            .await
            .unwrap();
        assert_eq!(echoed, Some(RelayFrame::Control(b"ping".to_vec())));

        drop(client);
        let tail = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tail, None);
    }
}
