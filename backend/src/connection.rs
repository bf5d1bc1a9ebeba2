//! Websocket gateway over a `MemoryStore`, so the document store can be
//! consumed remotely. One JSON request per message; snapshot notifications
//! are pushed as they arrive until the subscription is dropped.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{future, pin_mut, stream::TryStreamExt, StreamExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;

use waypost_client::store::{Document, DocumentStore, FieldOp, Query, Subscription};

use crate::store::MemoryStore;

type Tx = UnboundedSender<Message>;
type PeerMap = Arc<Mutex<HashMap<SocketAddr, Tx>>>;
type SubscriptionMap = Arc<Mutex<HashMap<u64, Subscription>>>;

#[derive(Debug)]
pub enum HandlerError {
    Handshake,
    PeerMapLock,
    FailedSocketBind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Subscribe {
        subscription_id: u64,
        collection: String,
        order_by: String,
        descending: bool,
    },
    Unsubscribe {
        subscription_id: u64,
    },
    Create {
        request_id: u64,
        collection: String,
        fields: Map<String, Value>,
    },
    Update {
        request_id: u64,
        collection: String,
        id: String,
        ops: Vec<FieldOp>,
    },
    Get {
        request_id: u64,
        collection: String,
        id: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot {
        subscription_id: u64,
        documents: Vec<Document>,
    },
    SubscriptionError {
        subscription_id: u64,
        message: String,
    },
    Created {
        request_id: u64,
        id: String,
    },
    Document {
        request_id: u64,
        document: Document,
    },
    Ack {
        request_id: u64,
    },
    RequestError {
        request_id: u64,
        message: String,
    },
}

async fn handle_connection(
    peer_map: PeerMap,
    store: MemoryStore,
    raw_stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), HandlerError> {
    info!("tcp connection from: {}", addr);

    let ws_stream = tokio_tungstenite::accept_async(raw_stream)
        .await
        .map_err(|_err| HandlerError::Handshake)?;

    let (tx, rx) = unbounded();
    peer_map
        .lock()
        .map_err(|_err| HandlerError::PeerMapLock)?
        .insert(addr, tx.clone());

    let (outgoing, incoming) = ws_stream.split();

    let subscriptions: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));

    let handle_incoming = incoming.try_for_each(|msg| {
        let store = store.clone();
        let tx = tx.clone();
        let subscriptions = subscriptions.clone();
        async move {
            if let Ok(text) = msg.to_text() {
                match serde_json::from_str::<ClientRequest>(text) {
                    Ok(request) => handle_request(&store, &tx, &subscriptions, request).await,
                    Err(err) => warn!("unparseable request from {}: {}", addr, err),
                }
            }
            Ok::<_, tokio_tungstenite::tungstenite::Error>(())
        }
    });

    let forward_outgoing = rx.map(Ok).forward(outgoing);

    pin_mut!(handle_incoming, forward_outgoing);
    future::select(handle_incoming, forward_outgoing).await;

    info!("{} disconnected", &addr);
    // Dropping the handles cancels every subscription this peer held.
    subscriptions
        .lock()
        .map_err(|_err| HandlerError::PeerMapLock)?
        .clear();
    peer_map
        .lock()
        .map_err(|_err| HandlerError::PeerMapLock)?
        .remove(&addr);

    Ok(())
}

async fn handle_request(
    store: &MemoryStore,
    tx: &Tx,
    subscriptions: &SubscriptionMap,
    request: ClientRequest,
) {
    match request {
        ClientRequest::Subscribe {
            subscription_id,
            collection,
            order_by,
            descending,
        } => {
            let query = Query {
                collection,
                order_by,
                descending,
            };
            let (mut notifications, handle) = store.subscribe(query);
            if let Ok(mut subscriptions) = subscriptions.lock() {
                subscriptions.insert(subscription_id, handle);
            }

            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(notification) = notifications.recv().await {
                    let message = match notification {
                        Ok(documents) => ServerMessage::Snapshot {
                            subscription_id,
                            documents,
                        },
                        Err(err) => ServerMessage::SubscriptionError {
                            subscription_id,
                            message: err.to_string(),
                        },
                    };
                    if send_message(&tx, &message).is_err() {
                        break;
                    }
                }
            });
        }
        ClientRequest::Unsubscribe { subscription_id } => {
            if let Ok(mut subscriptions) = subscriptions.lock() {
                if let Some(mut handle) = subscriptions.remove(&subscription_id) {
                    handle.cancel();
                }
            }
        }
        ClientRequest::Create {
            request_id,
            collection,
            fields,
        } => {
            let message = match store.create(&collection, fields).await {
                Ok(id) => ServerMessage::Created { request_id, id },
                Err(err) => ServerMessage::RequestError {
                    request_id,
                    message: err.to_string(),
                },
            };
            let _ = send_message(tx, &message);
        }
        ClientRequest::Update {
            request_id,
            collection,
            id,
            ops,
        } => {
            let message = match store.update_fields(&collection, &id, ops).await {
                Ok(()) => ServerMessage::Ack { request_id },
                Err(err) => ServerMessage::RequestError {
                    request_id,
                    message: err.to_string(),
                },
            };
            let _ = send_message(tx, &message);
        }
        ClientRequest::Get {
            request_id,
            collection,
            id,
        } => {
            let message = match store.get(&collection, &id).await {
                Ok(document) => ServerMessage::Document {
                    request_id,
                    document,
                },
                Err(err) => ServerMessage::RequestError {
                    request_id,
                    message: err.to_string(),
                },
            };
            let _ = send_message(tx, &message);
        }
    }
}

fn send_message(tx: &Tx, message: &ServerMessage) -> Result<(), ()> {
    let payload = serde_json::to_string(message).map_err(|_err| ())?;
    tx.unbounded_send(Message::Text(payload)).map_err(|_err| ())
}

pub async fn establish(addr: String, store: MemoryStore) -> Result<(), HandlerError> {
    let state = PeerMap::new(Mutex::new(HashMap::new()));

    let try_socket = TcpListener::bind(&addr).await;
    let listener = try_socket.map_err(|_err| HandlerError::FailedSocketBind)?;
    info!("listening on: {}", addr);

    loop {
        if let Ok((stream, addr)) = listener.accept().await {
            tokio::spawn(handle_connection(
                state.clone(),
                store.clone(),
                stream,
                addr,
            ));
        }
    }
}
