use crate::core::DaemonEvent;
use crate::store::SnapshotStore;
use crate::BroadcastMessage;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tube_core::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use tracing::{debug, error, info, warn};

pub fn start_server(
    address: String,
    store: Arc<SnapshotStore>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(&address).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", address, e);
                return;
            }
        };

        info!("TCP server listening at {}", address);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let store = store.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    tokio::spawn(async move {
                        let (read_half, write_half) = stream.into_split();
                        handle_client(read_half, write_half, store, id, evt_tx, bcast_rx).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client<R, W>(
    mut read_half: R,
    mut write_half: W,
    store: Arc<SnapshotStore>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&store).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        debug!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            let frame_len = match Message::frame_len(&read_buf) {
                                Ok(Some(n)) => n,
                                Ok(None) => break,
                                Err(e) => {
                                    warn!("Client {} sent an unusable frame header: {}", client_id, e);
                                    let _ = send_error(&mut write_half, e.to_string()).await;
                                    return;
                                }
                            };
                            let frame: Vec<u8> = read_buf.drain(..frame_len).collect();
                            match Message::decode(&frame) {
                                Ok((Message::Command(cmd), _)) => {
                                    debug!("Client {} sent command: {:?}", client_id, cmd);
                                    if event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    }
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    info!("Client {} sent an invalid command: {}", client_id, e);
                                    let message = format!("Invalid command: {}", e);
                                    if send_error(&mut write_half, message).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let outgoing = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&store).await,
                    Ok(BroadcastMessage::CacheStats(data)) => {
                        Message::Broadcast(Broadcast::CacheStats { data }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Ok(BroadcastMessage::Error(message)) => {
                        Message::Broadcast(Broadcast::Error { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&store).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = outgoing {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn send_error<W: AsyncWrite + Unpin>(write_half: &mut W, message: String) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(Broadcast::Error { message }).encode()?;
    write_half.write_all(&encoded).await?;
    Ok(())
}

async fn encode_hello(store: &SnapshotStore) -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state: store.get_state().await,
    })
    .encode()
}

async fn encode_state(store: &SnapshotStore) -> anyhow::Result<Vec<u8>> {
    let state = store.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tube_core::protocol::Command;

    async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Message {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await.unwrap();
        let mut frame = header.to_vec();
        frame.extend_from_slice(&body);
        Message::decode(&frame).unwrap().0
    }

    type ClientHalves = (
        tokio::io::ReadHalf<tokio::io::DuplexStream>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
    );

    /// Spawn a client handler over an in-memory pipe and consume its Hello.
    async fn connect(
        event_tx: mpsc::Sender<DaemonEvent>,
        broadcast_tx: &broadcast::Sender<BroadcastMessage>,
    ) -> ClientHalves {
        let store = Arc::new(SnapshotStore::new());
        let (client, server) = tokio::io::duplex(8192);
        let (server_read, server_write) = tokio::io::split(server);
        tokio::spawn(handle_client(
            server_read,
            server_write,
            store,
            1,
            event_tx,
            broadcast_tx.subscribe(),
        ));

        let (mut client_read, client_write) = tokio::io::split(client);
        match read_message(&mut client_read).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version, ..
            }) => assert_eq!(protocol_version, PROTOCOL_VERSION),
            other => panic!("expected Hello, got {:?}", other),
        }
        (client_read, client_write)
    }

    fn raw_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = (body.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(body);
        frame
    }

    #[tokio::test]
    async fn hello_then_commands_then_broadcasts() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (broadcast_tx, _) = broadcast::channel(8);
        let (mut client_read, mut client_write) = connect(event_tx, &broadcast_tx).await;

        let frame = Message::Command(Command::Select { index: 2 }).encode().unwrap();
        client_write.write_all(&frame).await.unwrap();
        match event_rx.recv().await {
            Some(DaemonEvent::ClientCommand(Command::Select { index })) => assert_eq!(index, 2),
            _ => panic!("expected Select command"),
        }

        broadcast_tx
            .send(BroadcastMessage::Error("seek rejected".to_string()))
            .unwrap();
        match read_message(&mut client_read).await {
            Message::Broadcast(Broadcast::Error { message }) => assert_eq!(message, "seek rejected"),
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_command_is_reported_and_skipped() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (broadcast_tx, _) = broadcast::channel(8);
        let (mut client_read, mut client_write) = connect(event_tx, &broadcast_tx).await;

        let mut bytes = raw_frame(br#"{"cmd":"Select","index":-1}"#);
        bytes.extend_from_slice(&Message::Command(Command::Next).encode().unwrap());
        client_write.write_all(&bytes).await.unwrap();

        match read_message(&mut client_read).await {
            Message::Broadcast(Broadcast::Error { message }) => {
                assert!(message.starts_with("Invalid command"), "{}", message)
            }
            other => panic!("expected Error, got {:?}", other),
        }
        let next = tokio::time::timeout(std::time::Duration::from_secs(2), event_rx.recv())
            .await
            .expect("command after the invalid one was not forwarded");
        assert!(matches!(next, Some(DaemonEvent::ClientCommand(Command::Next))));
    }

    #[tokio::test]
    async fn oversized_frame_header_closes_connection() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let (broadcast_tx, _) = broadcast::channel(8);
        let (mut client_read, mut client_write) = connect(event_tx, &broadcast_tx).await;

        let header = ((tube_core::protocol::MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        client_write.write_all(&header).await.unwrap();

        match read_message(&mut client_read).await {
            Message::Broadcast(Broadcast::Error { .. }) => {}
            other => panic!("expected Error, got {:?}", other),
        }
        let mut rest = Vec::new();
        let n = client_read.read_to_end(&mut rest).await.unwrap();
        assert_eq!(n, 0);
    }
}
