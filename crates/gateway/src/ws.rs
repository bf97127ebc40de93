use std::{fmt::Display, net::SocketAddr};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{Sink, SinkExt, Stream, StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{registry::ClientHandle, session::Session};

/// Drive an upgraded, already authenticated connection until it closes.
pub async fn handle_connection(socket: WebSocket, session: Session, remote_addr: SocketAddr) {
    let (ws_tx, ws_rx) = socket.split();
    drive(ws_tx, ws_rx, session, remote_addr).await;
}

/// One writer task drains the connection's outbox so relay writes never
/// interleave; this task reads frames and dispatches them through `session`.
async fn drive<S, R, E>(ws_tx: S, mut ws_rx: R, mut session: Session, remote_addr: SocketAddr)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (client_tx, client_rx) = mpsc::unbounded_channel::<String>();

    let handle = ClientHandle::new(client_tx);
    let conn_id = handle.conn_id().to_string();
    let cancel = handle.cancellation();

    if let Err(e) = session.activate(handle.clone()).await {
        warn!(conn_id = %conn_id, error = %e, "ws: could not activate session");
        return;
    }
    let user_id = session.identity().map(|i| i.id).unwrap_or_default();
    info!(conn_id = %conn_id, user_id, remote = %remote_addr, "ws: new connection");

    let write_handle = tokio::spawn(write_loop(ws_tx, client_rx, handle));

    // Read loop.
    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = cancel.cancelled() => {
                debug!(conn_id = %conn_id, "ws: connection cancelled");
                break;
            },
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                session.dispatch(text.as_str()).await;
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {},
            Some(Err(e)) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        }
    }

    session.close().await;
    cancel.cancel();
    let _ = write_handle.await;
    info!(conn_id = %conn_id, user_id, "ws: connection closed");
}

/// Outbox → socket. A failed write closes `handle`, which also stops the
/// read loop so the session is torn down.
async fn write_loop<S>(
    mut ws_tx: S,
    mut outbox: mpsc::UnboundedReceiver<String>,
    handle: ClientHandle,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let cancel = handle.cancellation();
    loop {
        tokio::select! {
            frame = outbox.recv() => {
                let Some(text) = frame else { break };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    warn!(conn_id = %handle.conn_id(), error = %e, "ws: write failed, closing connection");
                    handle.close();
                    return;
                }
            },
            () = cancel.cancelled() => break,
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            broadcast::BroadcastRelay,
            registry::{ConnectionRegistry, SendOutcome},
            rooms::RoomMembership,
            test_support::MockStore,
        },
        chatrelay_auth::TokenService,
        std::{sync::Arc, time::Duration},
    };

    fn authenticated_session(relay: &Arc<BroadcastRelay>, id: i64) -> Session {
        let tokens = TokenService::new("ws-test-secret", 1);
        let token = tokens.issue(id, "alice").unwrap();
        let mut session = Session::new(Arc::clone(relay));
        session.authenticate(&tokens, Some(&token)).unwrap();
        session
    }

    #[tokio::test]
    async fn write_failure_closes_handle() {
        let (sink, sink_rx) = futures::channel::mpsc::unbounded::<Message>();
        drop(sink_rx);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ClientHandle::new(tx);
        let cancel = handle.cancellation();

        assert!(handle.send("hello"));
        write_loop(sink, rx, handle.clone()).await;

        assert!(handle.is_closed());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn write_failure_tears_down_session() {
        let relay = Arc::new(BroadcastRelay::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(RoomMembership::new()),
            Arc::new(MockStore::default().with_members(4, &[1])),
        ));
        let session = authenticated_session(&relay, 1);

        let (sink, sink_rx) = futures::channel::mpsc::unbounded::<Message>();
        drop(sink_rx);
        // A peer that never sends anything; only the write side can end this.
        let stream = futures::stream::pending::<Result<Message, axum::Error>>();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let task = tokio::spawn(drive(sink, stream, session, addr));

        let registry = Arc::clone(relay.registry());
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.lookup(1).await.is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        relay.rooms().join(4, 1).await;

        assert_eq!(registry.send(1, "frame").await, SendOutcome::Delivered);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert!(registry.lookup(1).await.is_none());
        assert_eq!(relay.rooms().room_count().await, 0);
    }
}
