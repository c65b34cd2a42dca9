//! Server network layer: UDP receive/send tasks around the single-owner relay

use crate::level_transfer::{spawn_transfer_task, TransferJob};
use crate::relay::{Outbound, Relay};
use log::{error, info, warn};
use shared::packet::fits_datagram;
use shared::{log_datagram, Level, Packet, DEFAULT_PORT, PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Level to serve at startup, relative to `levels_dir`; `None` generates one
    pub level: Option<String>,
    pub levels_dir: PathBuf,
    pub version: String,
    /// Player running in the same process; never sent a level stream
    pub host_username: Option<String>,
    pub transfer_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            level: None,
            levels_dir: PathBuf::from("levels"),
            version: PROTOCOL_VERSION.to_string(),
            host_username: None,
            transfer_timeout: Duration::from_secs(10),
        }
    }
}

/// Messages sent from network tasks and handles to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        data: Vec<u8>,
        addr: SocketAddr,
    },
    StartGame {
        mode: String,
        map: String,
        system_path: String,
    },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Cloneable control surface of a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<ServerMessage>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Asks the server to switch level and start a round
    pub fn start_game(&self, mode: &str, map: &str, system_path: &str) -> bool {
        self.tx
            .send(ServerMessage::StartGame {
                mode: mode.to_string(),
                map: map.to_string(),
                system_path: system_path.to_string(),
            })
            .is_ok()
    }

    pub fn shutdown(&self) {
        if self.tx.send(ServerMessage::Shutdown).is_err() {
            warn!("Server already stopped");
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Relay server bound to one UDP socket
pub struct Server {
    socket: Arc<UdpSocket>,
    relay: Relay,
    config: ServerConfig,
    tasks: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
    transfer_tx: mpsc::UnboundedSender<TransferJob>,
    transfer_rx: Option<mpsc::UnboundedReceiver<TransferJob>>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, BoxError> {
        let level = match &config.level {
            Some(path) => Level::load(&config.levels_dir, path)?,
            None => Level::default(),
        };
        info!(
            "Serving level {} ({}x{})",
            level.path(),
            level.width(),
            level.height()
        );
        let relay = Relay::new(level, &config.version, config.host_username.clone())?;

        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!(
            "Server listening on {} (version {})",
            socket.local_addr()?,
            config.version
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            relay,
            config,
            tasks: Vec::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
            transfer_tx,
            transfer_rx: Some(transfer_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn handle(&self) -> std::io::Result<ServerHandle> {
        Ok(ServerHandle {
            tx: self.server_tx.clone(),
            local_addr: self.local_addr()?,
        })
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = [0u8; PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        log_datagram("recv", addr, &buffer[..len]);
                        let data = buffer[..len].to_vec();
                        if let Err(e) = server_tx.send(ServerMessage::PacketReceived { data, addr }) {
                            error!("Failed to send packet to main loop: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that processes the outgoing datagram queue
    fn spawn_network_sender(&mut self) {
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);

        self.tasks.push(tokio::spawn(async move {
            while let Some(GameMessage::SendPacket { packet, addr }) = game_rx.recv().await {
                let data = packet.encode();
                if !fits_datagram(&data) {
                    warn!(
                        "{:?} for {} is {} bytes and will be truncated by the receiver",
                        packet.packet_type(),
                        addr,
                        data.len()
                    );
                }
                log_datagram("send", addr, &data);
                if let Err(e) = socket.send_to(&data, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        }));
    }

    fn spawn_level_transfer(&mut self) -> std::io::Result<()> {
        let Some(transfer_rx) = self.transfer_rx.take() else {
            return Ok(());
        };
        let bind_addr = self.local_addr()?;
        self.tasks.push(spawn_transfer_task(
            bind_addr,
            self.config.transfer_timeout,
            transfer_rx,
        ));
        Ok(())
    }

    fn dispatch(&self, outbound: Vec<Outbound>) {
        for action in outbound {
            match action {
                Outbound::Send { packet, addr } => {
                    if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
                        error!("Failed to queue packet for sending: {}", e);
                    }
                }
                Outbound::PushLevel { addr, png } => {
                    let job = TransferJob {
                        recipient: addr,
                        png,
                    };
                    if let Err(e) = self.transfer_tx.send(job) {
                        error!("Failed to queue level transfer: {}", e);
                    }
                }
            }
        }
    }

    fn start_game(&mut self, mode: &str, map: &str, system_path: &str) {
        let level = match Level::load(&self.config.levels_dir, system_path) {
            Ok(level) => level,
            Err(e) => {
                error!("Could not load level {}: {}", system_path, e);
                return;
            }
        };

        match self.relay.start_game(mode, map, level) {
            Ok(outbound) => self.dispatch(outbound),
            Err(e) => error!("Could not switch to level {}: {}", system_path, e),
        }
    }

    /// Main server loop; returns after a shutdown request
    pub async fn run(&mut self) -> Result<(), BoxError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_level_transfer()?;

        info!("Server started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { data, addr }) => {
                    let outbound = self.relay.handle_datagram(&data, addr);
                    self.dispatch(outbound);
                }
                Some(ServerMessage::StartGame {
                    mode,
                    map,
                    system_path,
                }) => {
                    self.start_game(&mode, &map, &system_path);
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{LoginReply, LoginRequest};
    use tokio_test::assert_ok;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:9714");
        assert_eq!(config.version, "v1.1.01");
        assert!(config.level.is_none());
        assert!(config.host_username.is_none());
    }

    #[tokio::test]
    async fn test_missing_startup_level_fails_bind() {
        let config = ServerConfig {
            level: Some("does/not/exist.png".to_string()),
            ..loopback_config()
        };
        assert!(Server::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_answers_team_query_and_shuts_down() {
        let mut server = Server::bind(loopback_config()).await.unwrap();
        let handle = server.handle().unwrap();
        let server_task = tokio::spawn(async move { server.run().await.is_ok() });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let query = LoginRequest::TeamQuery.to_packet("Bob", PROTOCOL_VERSION);
        assert_ok!(socket.send_to(&query.encode(), handle.local_addr()).await);

        let mut buffer = [0u8; PACKET_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        let reply = LoginReply::from_packet(&Packet::decode(&buffer[..len]));
        assert_eq!(reply, Some(LoginReply::TeamCounts { green: 0, red: 0 }));

        handle.shutdown();
        assert!(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_level_keeps_current_one() {
        let mut server = Server::bind(loopback_config()).await.unwrap();
        server.start_game("CTF", "Nowhere", "missing.png");
        assert!(server.relay().running_game().is_none());
        assert!(server.relay().level().is_generated());
    }
}
