use std::future::Future;
use std::net::SocketAddr;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::protocol::{ClientMessage, FrameDecoder, ServerMessage};
use crate::session::{Admission, ConnectionGuard, GameSession};

/// Accepts players until `shutdown` resolves.
///
/// While both seats are taken the listener does not accept; the next
/// connection is taken as soon as a seat frees up. An accept failure ends the
/// loop with an error.
pub async fn run(
    listener: TcpListener,
    session: GameSession,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tokio::pin!(shutdown);

    loop {
        if session.is_full() {
            debug!("Both seats taken, holding new connections");
        } else {
            info!("Waiting for players...");
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = session.wait_for_free_slot() => {}
        }

        let (stream, addr) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    return Err(e).context("accepting connection");
                }
            },
        };

        let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();

        // Seated here rather than in the connection task so the next
        // iteration sees the updated seat count.
        let admission = match session.admit(tx) {
            Ok(admission) => admission,
            Err(e) => {
                warn!("Connection rejected from {}: {}", addr, e);
                drop(stream);
                continue;
            }
        };
        // Owned by the task from here on, so the seat is freed even if the
        // task never gets polled.
        let guard = session.guard(admission.id);
        info!(
            "Player {} connected from {} ({})",
            admission.player.number(),
            addr,
            admission.id
        );

        let session = session.clone();
        tokio::spawn(handle_connection(stream, addr, session, admission, guard, rx));
    }

    info!("Shutting down, no longer accepting players");
    Ok(())
}

/// Drives one seated connection until it closes or fails. Dropping `guard`
/// frees the seat.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    session: GameSession,
    admission: Admission,
    guard: ConnectionGuard,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    let player = admission.player;

    let (mut reader, writer) = stream.into_split();

    // Task to forward messages from channel to the socket
    let send_task = tokio::spawn(write_messages(writer, rx, addr));

    let mut decoder = FrameDecoder::new();
    let reason = loop {
        match reader.read_buf(decoder.buffer_mut()).await {
            Ok(0) => break "connection closed".to_string(),
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }

        while let Some(frame) = decoder.next_frame() {
            session.handle_message(player, ClientMessage::decode(&frame));
        }
        if let Some(frame) = decoder.flush() {
            session.handle_message(player, ClientMessage::decode(&frame));
        }
    };

    info!("Player {} disconnected ({}): {}", player.number(), addr, reason);

    // Cleanup on disconnect
    drop(guard);
    send_task.abort();
}

async fn write_messages(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    addr: SocketAddr,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = writer.write_all(msg.to_string().as_bytes()).await {
            warn!("Failed to send {} to {}: {}", msg.tag(), addr, e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server_side, addr) = listener.accept().await.unwrap();
        (client, server_side, addr)
    }

    #[tokio::test]
    async fn aborted_task_frees_seat_before_first_poll() {
        let session = GameSession::new();
        let (_client, stream, addr) = connected_pair().await;

        let (tx, rx) = mpsc::unbounded_channel();
        let admission = session.admit(tx).unwrap();
        let guard = session.guard(admission.id);
        assert_eq!(session.player_count(), 1);

        let task = tokio::spawn(handle_connection(
            stream,
            addr,
            session.clone(),
            admission,
            guard,
            rx,
        ));
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(session.player_count(), 0);
    }

    #[tokio::test]
    async fn closed_client_frees_seat() {
        let session = GameSession::new();
        let (client, stream, addr) = connected_pair().await;

        let (tx, rx) = mpsc::unbounded_channel();
        let admission = session.admit(tx).unwrap();
        let guard = session.guard(admission.id);

        drop(client);
        handle_connection(stream, addr, session.clone(), admission, guard, rx).await;
        assert_eq!(session.player_count(), 0);
    }
}
