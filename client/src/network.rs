use crate::handshake::{Handshake, LoginState};
use crate::level_download::download_level;
use crate::mirror::MirrorSnapshot;
use crate::session::{ClientSession, Reaction};
use log::{debug, error, info, warn};
use shared::level::GENERATED_PATH;
use shared::{
    log_datagram, Direction, Level, NetError, Packet, Result, Team, DEFAULT_PORT, PACKET_SIZE,
    PROTOCOL_VERSION, TICKS_PER_SECOND,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

const LOGIN_POLL_INTERVAL: Duration = Duration::from_millis(20);
const LOGIN_RESEND_INTERVAL: Duration = Duration::from_millis(500);

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the relay
    pub server_addr: String,
    pub username: String,
    /// `None` joins the smaller team
    pub team: Option<Team>,
    pub version: String,
    /// Runs in the same process as the server; levels are read from disk
    pub is_host: bool,
    pub levels_dir: PathBuf,
    /// Level the embedded server starts with, relative to `levels_dir`
    pub host_level: Option<String>,
    pub login_timeout: Duration,
    pub level_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            username: String::new(),
            team: None,
            version: PROTOCOL_VERSION.to_string(),
            is_host: false,
            levels_dir: PathBuf::from("levels"),
            host_level: None,
            login_timeout: Duration::from_secs(5),
            level_timeout: Duration::from_secs(10),
        }
    }
}

/// Player actions fed into [`Client::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Steer(Direction),
    Stop,
    Fire,
    PlaceMine,
    Chat(String),
    Quit,
}

/// Where announced levels come from
#[derive(Debug, Clone)]
enum LevelSource {
    Download { server: SocketAddr, limit: Duration },
    Disk { levels_dir: PathBuf },
}

impl LevelSource {
    async fn obtain(&self, path: &str, width: u32, height: u32) -> Result<Level> {
        match self {
            LevelSource::Download { server, limit } => {
                download_level(*server, path, width, height, *limit).await
            }
            LevelSource::Disk { .. } if path == GENERATED_PATH => Ok(Level::blank(width, height)),
            LevelSource::Disk { levels_dir } => Level::load(levels_dir, path),
        }
    }
}

async fn send_packet(socket: &UdpSocket, addr: SocketAddr, packet: &Packet) {
    let data = packet.encode();
    log_datagram("send", addr, &data);
    if let Err(e) = socket.send_to(&data, addr).await {
        error!("Failed to send {:?}: {}", packet.packet_type(), e);
    }
}

async fn send_all(socket: &UdpSocket, addr: SocketAddr, packets: Vec<Packet>) {
    for packet in &packets {
        send_packet(socket, addr, packet).await;
    }
}

async fn fetch_level(
    source: LevelSource,
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    session: Arc<Mutex<ClientSession>>,
    path: String,
    width: u32,
    height: u32,
) {
    match source.obtain(&path, width, height).await {
        Ok(level) => {
            let packets = session.lock().await.level_ready(level);
            send_all(&socket, server_addr, packets).await;
        }
        Err(e) => {
            error!("Could not obtain level {}: {}", path, e);
            let packets = session.lock().await.level_failed();
            send_all(&socket, server_addr, packets).await;
        }
    }
}

/// Spawns the task that applies every inbound datagram to the session
fn spawn_receive_loop(
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    session: Arc<Mutex<ClientSession>>,
    levels: LevelSource,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = [0u8; PACKET_SIZE];

        loop {
            let (len, addr) = match socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                    sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            log_datagram("recv", addr, &buffer[..len]);

            let packet = Packet::decode(&buffer[..len]);
            let result = session.lock().await.handle_packet(packet);

            match result {
                Ok(reactions) => {
                    for reaction in reactions {
                        match reaction {
                            Reaction::Send(packet) => {
                                send_packet(&socket, server_addr, &packet).await
                            }
                            Reaction::FetchLevel {
                                path,
                                width,
                                height,
                            } => {
                                tokio::spawn(fetch_level(
                                    levels.clone(),
                                    Arc::clone(&socket),
                                    server_addr,
                                    Arc::clone(&session),
                                    path,
                                    width,
                                    height,
                                ));
                            }
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!("Receive loop stopping: {}", e);
                    break;
                }
                Err(e) => warn!("{}", e),
            }
        }
    })
}

/// A connected player: UDP socket, receive loop and the shared session
pub struct Client {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    session: Arc<Mutex<ClientSession>>,
    config: ClientConfig,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Resolves the server, binds a socket and starts receiving
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let server_addr = lookup_host(&config.server_addr)
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve", config.server_addr),
                )
            })?;
        let local = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = Arc::new(UdpSocket::bind(local).await?);
        info!(
            "Client bound to {}, server is {}",
            socket.local_addr()?,
            server_addr
        );

        let session = Arc::new(Mutex::new(ClientSession::new(
            &config.username,
            &config.version,
            config.is_host,
        )?));

        let levels = if config.is_host {
            LevelSource::Disk {
                levels_dir: config.levels_dir.clone(),
            }
        } else {
            LevelSource::Download {
                server: server_addr,
                limit: config.level_timeout,
            }
        };
        let receiver = spawn_receive_loop(
            Arc::clone(&socket),
            server_addr,
            Arc::clone(&session),
            levels,
        );

        Ok(Client {
            socket,
            server_addr,
            session,
            config,
            receiver,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub async fn username(&self) -> String {
        self.session.lock().await.username().to_string()
    }

    pub async fn snapshot(&self) -> MirrorSnapshot {
        self.session.lock().await.mirror().snapshot()
    }

    async fn send(&self, packet: &Packet) {
        send_packet(&self.socket, self.server_addr, packet).await;
    }

    fn ensure_receiving(&self) -> Result<()> {
        if self.receiver.is_finished() {
            return Err(NetError::Fatal("receive loop stopped".to_string()));
        }
        Ok(())
    }

    /// Polls the handshake until `done`, resending the open request now and then
    async fn await_login_step(&self, done: impl Fn(&Handshake) -> bool) -> Result<()> {
        let deadline = Instant::now() + self.config.login_timeout;
        let mut last_sent = Instant::now();

        loop {
            let resend = {
                let session = self.session.lock().await;
                let handshake = session.handshake();
                if let LoginState::Rejected(reply) = handshake.state() {
                    return Err(NetError::LoginRejected(reply.clone()));
                }
                if done(handshake) {
                    return Ok(());
                }
                handshake
                    .pending_request()
                    .filter(|_| last_sent.elapsed() >= LOGIN_RESEND_INTERVAL)
            };

            if let Some(request) = resend {
                debug!("Resending login request");
                self.send(&request).await;
                last_sent = Instant::now();
            }
            if Instant::now() >= deadline {
                return Err(NetError::LoginTimeout);
            }
            self.ensure_receiving()?;
            sleep(LOGIN_POLL_INTERVAL).await;
        }
    }

    async fn await_level(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.level_timeout;
        while self.session.lock().await.mirror().level().is_none() {
            if Instant::now() >= deadline {
                return Err(NetError::LevelTimeout);
            }
            self.ensure_receiving()?;
            sleep(LOGIN_POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Runs the whole join sequence; returns once the player is spawned
    pub async fn login(&self) -> Result<()> {
        let query = self.session.lock().await.handshake_mut().begin();
        self.send(&query).await;
        self.await_login_step(|h| matches!(h.state(), LoginState::ChoosingTeam { .. }))
            .await?;

        let register = {
            let mut session = self.session.lock().await;
            let team = self
                .config
                .team
                .or_else(|| session.handshake().suggested_team())
                .unwrap_or(Team::Green);
            info!("Joining team {}", team);
            session.handshake_mut().choose_team(team)?
        };
        self.send(&register).await;
        self.await_login_step(|h| matches!(h.state(), LoginState::Approved { .. }))
            .await?;

        if self.config.is_host {
            let level = match &self.config.host_level {
                Some(path) => Level::load(&self.config.levels_dir, path)?,
                None => Level::default(),
            };
            self.session.lock().await.level_ready(level);
        }

        let login = self.session.lock().await.login()?;
        self.send(&login).await;

        self.await_level().await?;
        let packets = self.session.lock().await.finish_login();
        send_all(&self.socket, self.server_addr, packets).await;

        info!("Logged in as {}", self.username().await);
        Ok(())
    }

    async fn apply(&self, intent: Intent) {
        let outgoing = {
            let mut session = self.session.lock().await;
            match intent {
                Intent::Steer(dir) => {
                    if let Some(local) = session.mirror_mut().local_mut() {
                        local.steer(dir);
                    }
                    None
                }
                Intent::Stop => {
                    if let Some(local) = session.mirror_mut().local_mut() {
                        local.stop();
                    }
                    None
                }
                Intent::Fire => session.fire(),
                Intent::PlaceMine => session.place_mine(),
                Intent::Chat(text) => Some(session.chat(&text)),
                Intent::Quit => None,
            }
        };
        if let Some(packet) = outgoing {
            self.send(&packet).await;
        }
    }

    /// Tick loop; ends on [`Intent::Quit`], a closed channel or a dead receive loop
    pub async fn run(&self, mut intents: mpsc::UnboundedReceiver<Intent>) -> Result<()> {
        let mut ticker = interval(Duration::from_micros(1_000_000 / TICKS_PER_SECOND));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.ensure_receiving()?;
                    let packets = self.session.lock().await.tick();
                    send_all(&self.socket, self.server_addr, packets).await;
                }
                intent = intents.recv() => match intent {
                    Some(Intent::Quit) | None => break,
                    Some(intent) => self.apply(intent).await,
                },
            }
        }

        self.disconnect().await;
        Ok(())
    }

    pub async fn disconnect(&self) {
        let packet = self.session.lock().await.disconnect();
        self.send(&packet).await;
        info!("Disconnected from {}", self.server_addr);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}
