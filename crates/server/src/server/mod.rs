//! WebSocket server.
//!
//! Accepts connections, performs the join handshake and relays packets
//! between a client and its room task.

use crate::auth::{StaticTickets, TicketVerifier};
use crate::config::Config;
use crate::ledger::{MemoryLedger, StakeLedger};
use crate::room::{JoinRequest, RoomCommand, RoomRegistry};
use futures_util::{SinkExt, Stream, StreamExt};
use glam::Vec2;
use protocol::packets::{self, ClientPacket};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, warn};

pub mod client;

pub use client::{ClientView, Delivery, encode_targeted, route_targeted};

/// How long a new connection may take to send its Join.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection tracking state (shared across connection handlers).
struct ConnectionState {
    /// Number of connections per IP address.
    ip_connections: HashMap<IpAddr, usize>,
    /// Total number of connections.
    total_connections: usize,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            ip_connections: HashMap::new(),
            total_connections: 0,
        }
    }

    /// Try to add a connection, returns true if allowed.
    fn try_add_connection(&mut self, ip: IpAddr, max_total: usize, max_per_ip: usize) -> bool {
        if self.total_connections >= max_total {
            return false;
        }
        let current = self.ip_connections.get(&ip).copied().unwrap_or(0);
        if current >= max_per_ip {
            return false;
        }

        *self.ip_connections.entry(ip).or_insert(0) += 1;
        self.total_connections += 1;
        true
    }

    fn remove_connection(&mut self, ip: IpAddr) {
        if let Some(count) = self.ip_connections.get_mut(&ip) {
            if *count > 0 {
                *count -= 1;
                self.total_connections = self.total_connections.saturating_sub(1);
            }
            if *count == 0 {
                self.ip_connections.remove(&ip);
            }
        }
    }
}

/// Shared by every connection handler.
struct Shared {
    config: Arc<Config>,
    registry: RoomRegistry,
    tickets: Box<dyn TicketVerifier>,
}

/// Run the arena server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}", addr);

    let config = Arc::new(config);
    let ledger: Arc<dyn StakeLedger> = Arc::new(MemoryLedger::with_accounts(&config.accounts));
    let tickets = StaticTickets::from_accounts(&config.accounts);
    info!(
        "Loaded {} ledger accounts ({} with tickets)",
        config.accounts.len(),
        tickets.len()
    );

    let shared = Arc::new(Shared {
        registry: RoomRegistry::new(Arc::clone(&config), ledger),
        tickets: Box::new(tickets),
        config: Arc::clone(&config),
    });
    let conn_state = Arc::new(RwLock::new(ConnectionState::new()));

    let max_connections = config.server.max_connections;
    let ip_limit = config.server.ip_limit;

    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down, settling open stakes");
                break;
            }
        };
        let ip = addr.ip();

        if !conn_state
            .write()
            .await
            .try_add_connection(ip, max_connections, ip_limit)
        {
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        }

        let shared = Arc::clone(&shared);
        let conn_state = Arc::clone(&conn_state);
        tokio::spawn(async move {
            let result = handle_connection(stream, addr, &shared).await;

            // Always remove from connection tracking when done
            conn_state.write().await.remove_connection(ip);

            if let Err(e) = result {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }

    shared.registry.shutdown().await;
    Ok(())
}

/// Wait for the first packet, which must be a Join.
async fn read_join<S>(read: &mut S) -> Option<ClientPacket>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                return match ClientPacket::parse(&data) {
                    Ok(join @ ClientPacket::Join { .. }) => Some(join),
                    Ok(other) => {
                        debug!("Expected Join, got {:?}", other);
                        None
                    }
                    Err(e) => {
                        debug!("Bad Join packet: {}", e);
                        None
                    }
                };
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Turn a parsed Join into a room name and request.
fn join_request(packet: ClientPacket, config: &Config, tickets: &dyn TicketVerifier) -> Option<(String, JoinRequest)> {
    let ClientPacket::Join {
        room,
        name,
        user_id,
        ticket,
        stake,
    } = packet
    else {
        return None;
    };

    let room = match room.trim() {
        "" => config.server.default_room.clone(),
        room => room.to_string(),
    };
    let display_name: String = name.trim().chars().take(config.server.max_nick_length).collect();
    let is_authenticated = !user_id.is_empty() && tickets.verify(&user_id, &ticket);
    if !user_id.is_empty() && !is_authenticated {
        warn!("Ticket check failed for {}, joining as guest", user_id);
    }

    Some((
        room,
        JoinRequest {
            display_name,
            user_id: is_authenticated.then_some(user_id),
            stake,
            is_authenticated,
        },
    ))
}

async fn reject(write: &mut (impl SinkExt<Message> + Unpin), reason: &str) {
    let packet = packets::build_rejected(reason);
    let _ = write.send(Message::Binary(packet.finish().to_vec().into())).await;
}

/// Handle a single WebSocket connection.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, shared: &Shared) -> anyhow::Result<()> {
    let ws_stream: WebSocketStream<TcpStream> = accept_async(stream).await?;
    info!("New connection from {}", addr);

    let (mut write, mut read) = ws_stream.split();

    let join = match timeout(JOIN_TIMEOUT, read_join(&mut read)).await {
        Ok(Some(join)) => join,
        Ok(None) | Err(_) => {
            reject(&mut write, "expected join").await;
            return Ok(());
        }
    };
    let Some((room_name, request)) = join_request(join, &shared.config, shared.tickets.as_ref()) else {
        return Ok(());
    };

    let room = match shared.registry.get_or_create(&room_name).await {
        Ok(room) => room,
        Err(e) => {
            warn!("Join from {} rejected: {}", addr, e);
            reject(&mut write, &e.to_string()).await;
            return Ok(());
        }
    };

    // Subscribe before joining so the Joined message is not missed.
    let mut world_rx = room.subscribe_world();
    let mut targeted_rx = room.subscribe_targeted();
    let accepted = match room.join(request).await {
        Ok(accepted) => accepted,
        Err(e) => {
            reject(&mut write, &e.to_string()).await;
            return Ok(());
        }
    };
    let session = accepted.session;
    let mut view = ClientView::new(session);
    info!("{} joined room {} as session {}", addr, room.name(), session);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let command = match ClientPacket::parse(&data) {
                            Ok(ClientPacket::Input { sequence, dx, dy }) => RoomCommand::Input {
                                session,
                                sequence,
                                direction: Vec2::new(dx, dy),
                            },
                            Ok(ClientPacket::Split { target_x, target_y }) => RoomCommand::Split {
                                session,
                                target: Vec2::new(target_x, target_y),
                            },
                            Ok(ClientPacket::Leave) => break,
                            Ok(ClientPacket::Join { .. }) => {
                                debug!("Ignoring repeated Join from {}", addr);
                                continue;
                            }
                            Err(e) => {
                                warn!("Packet error from {}: {}", addr, e);
                                continue;
                            }
                        };
                        if room.send(command).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            snapshot = world_rx.recv() => {
                match snapshot {
                    Ok(snapshot) => {
                        let packet = view.snapshot_packet(&snapshot);
                        if let Err(e) = write.send(Message::Binary(packet.finish().to_vec().into())).await {
                            warn!("Failed to send snapshot to {}: {}", addr, e);
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("{} lagged {} snapshots", addr, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            targeted = targeted_rx.recv() => {
                if let Err(RecvError::Lagged(skipped)) = &targeted {
                    warn!("{} missed {} targeted messages, closing", addr, skipped);
                }
                let packet = match route_targeted(targeted, session) {
                    Delivery::Send(packet) => packet,
                    Delivery::Skip => continue,
                    Delivery::Close => break,
                };
                if let Err(e) = write.send(Message::Binary(packet.finish().to_vec().into())).await {
                    warn!("Failed to send targeted message to {}: {}", addr, e);
                    break;
                }
            }
        }
    }

    // Idempotent when the room already removed the session.
    let _ = room.send(RoomCommand::Leave { session }).await;
    let _ = write.close().await;
    Ok(())
}
