//! Packet dispatch, fan-out and login handshake on the server
//!
//! [`Relay`] owns every piece of mutable server state: the session table,
//! the entity id counter, the active level and the running round. It is
//! driven by a single task, one packet at a time, and answers with a list
//! of [`Outbound`] actions for the network tasks to carry out. Level
//! streams are requested as [`Outbound::PushLevel`] so the transfer runs
//! beside the relay instead of inside it.

use crate::commands::{Command, HELP_DOCUMENT};
use crate::session_table::{IdAllocator, Session, SessionTable};
use log::{debug, info, trace, warn};
use shared::{
    validate_username, Level, LoginReply, LoginRequest, Packet, Team, CAPTURE_THE_FLAG,
    DESTROY_ALL, KILL_DAMAGE, SERVER_NAME,
};
use std::net::SocketAddr;
use std::sync::Arc;

pub const NOTICE_COLOR: u16 = 440;
pub const COMMAND_REPLY_COLOR: u16 = 0;

/// Work produced by the relay for the network tasks
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// One datagram to one address
    Send { packet: Packet, addr: SocketAddr },
    /// Serve the encoded level once over the stream listener for `addr`
    PushLevel {
        addr: SocketAddr,
        png: Arc<Vec<u8>>,
    },
}

impl Outbound {
    pub fn addr(&self) -> SocketAddr {
        match self {
            Outbound::Send { addr, .. } | Outbound::PushLevel { addr, .. } => *addr,
        }
    }
}

pub struct Relay {
    sessions: SessionTable,
    ids: IdAllocator,
    level: Level,
    level_png: Arc<Vec<u8>>,
    running_game: Option<Packet>,
    version: String,
    host_username: Option<String>,
}

impl Relay {
    /// Creates a relay serving `level`; fails only if the level cannot be encoded
    pub fn new(level: Level, version: &str, host_username: Option<String>) -> shared::Result<Self> {
        let level_png = Arc::new(level.to_png()?);
        Ok(Self {
            sessions: SessionTable::new(),
            ids: IdAllocator::new(),
            level,
            level_png,
            running_game: None,
            version: version.to_string(),
            host_username,
        })
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn level_png(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.level_png)
    }

    /// STARTGAME of the round in progress, if any
    pub fn running_game(&self) -> Option<&Packet> {
        self.running_game.as_ref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn allocate_id(&mut self) -> i32 {
        self.ids.allocate()
    }

    /// Decodes and dispatches one received datagram
    pub fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) -> Vec<Outbound> {
        self.handle_packet(Packet::decode(data), addr)
    }

    /// Dispatches one packet
    ///
    /// Invalid packets are dropped without a reply. Apart from TESTLOGIN,
    /// a packet is only handled when its username holds a pending
    /// registration.
    pub fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> Vec<Outbound> {
        if !packet.is_valid() {
            trace!("Dropping invalid {:?} packet from {}", packet.packet_type(), addr);
            return Vec::new();
        }

        if let Packet::TestLogin {
            login_data,
            version,
            green,
            red,
            ..
        } = &packet
        {
            return self.handle_test_login(login_data, version, *green, *red, addr);
        }

        let accepted = packet
            .username()
            .map_or(false, |name| self.sessions.is_accepted(name));
        if !accepted {
            debug!(
                "Dropping {:?} from unregistered sender {} ({:?})",
                packet.packet_type(),
                addr,
                packet.username()
            );
            return Vec::new();
        }

        match packet {
            Packet::Login {
                username,
                id,
                x,
                y,
                team,
            } => self.handle_login(&username, id, x, y, team, addr),
            Packet::Disconnect { username } => self.handle_disconnect(&username),
            Packet::Move { .. } => self.handle_move(packet),
            Packet::Chat {
                username,
                color,
                message,
            } => self.handle_chat(&username, color, &message, addr),
            Packet::Damage { .. } | Packet::Destroy { .. } => self.broadcast(&packet, None),
            mut spawned @ (Packet::Bullet { .. } | Packet::Mine { .. }) => {
                let id = self.ids.allocate();
                spawned.set_entity_id(id);
                self.broadcast(&spawned, None)
            }
            Packet::Score { team, score, .. } => self.handle_score(team, score),
            other => {
                debug!(
                    "Ignoring client sent {:?} from {}",
                    other.packet_type(),
                    addr
                );
                Vec::new()
            }
        }
    }

    fn handle_test_login(
        &mut self,
        username: &str,
        version: &str,
        green: i32,
        red: i32,
        addr: SocketAddr,
    ) -> Vec<Outbound> {
        let reply = match LoginRequest::classify(green, red) {
            LoginRequest::TeamQuery => {
                let (green, red) = self.sessions.team_counts();
                LoginReply::TeamCounts { green, red }
            }
            LoginRequest::Register { team } => self.register(username, version, team, addr),
        };

        vec![Outbound::Send {
            packet: reply.to_packet(&self.version),
            addr,
        }]
    }

    fn register(
        &mut self,
        username: &str,
        version: &str,
        team: Team,
        addr: SocketAddr,
    ) -> LoginReply {
        if version != self.version {
            warn!(
                "[{}] Client tried to connect with version {} (server runs {})",
                addr, version, self.version
            );
            return LoginReply::VersionMismatch {
                server_version: self.version.clone(),
            };
        }

        if let Err(e) = validate_username(username) {
            warn!("[{}] Rejected username: {}", addr, e);
            return LoginReply::InvalidUsername {
                username: username.to_string(),
            };
        }

        if self.sessions.is_taken(username) {
            warn!("[{}] Username {} is already taken", addr, username);
            return LoginReply::UsernameTaken;
        }

        // A retried registration replaces the earlier one
        self.sessions.remove_pending(username);
        let id = self.ids.allocate();
        self.sessions.register_pending(team, username, id);
        info!("[{}] {} approved for {} with id {}", addr, username, team, id);
        LoginReply::Accepted { id }
    }

    fn handle_login(
        &mut self,
        username: &str,
        id: i32,
        x: i32,
        y: i32,
        team: Team,
        addr: SocketAddr,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();
        let joiner = Session::new(username, team, id, addr, x, y);
        let login = joiner.login_packet();

        for existing in self.sessions.sessions() {
            if existing.username.eq_ignore_ascii_case(username) {
                continue;
            }
            out.push(Outbound::Send {
                packet: login.clone(),
                addr: existing.addr,
            });
            out.push(Outbound::Send {
                packet: existing.login_packet(),
                addr,
            });
        }

        if !self.sessions.add(joiner) {
            debug!("[{}] Repeated LOGIN for {}", addr, username);
        }

        let notice = if self.running_game.is_some() {
            " joined the game."
        } else {
            " joined the lobby."
        };
        info!("[{}] {}{}", addr, username, notice);
        out.extend(self.broadcast(&Packet::chat(username, NOTICE_COLOR, notice), None));

        if !self.is_host(username) {
            out.push(Outbound::Send {
                packet: self.level_announcement(username),
                addr,
            });
            out.push(Outbound::PushLevel {
                addr,
                png: self.level_png(),
            });
        }

        if let Some(running) = &self.running_game {
            out.push(Outbound::Send {
                packet: running.clone(),
                addr,
            });

            let team_score = self
                .sessions
                .sessions()
                .iter()
                .find(|s| s.team == team && !s.username.eq_ignore_ascii_case(username))
                .map(|s| s.score);
            if let (Some(score), Some(session)) = (team_score, self.sessions.find_mut(username)) {
                session.score = score;
            }
        }

        out
    }

    fn handle_move(&mut self, packet: Packet) -> Vec<Outbound> {
        let Packet::Move {
            username, x, y, ..
        } = &packet
        else {
            return Vec::new();
        };

        if let Some(session) = self.sessions.find_mut(username) {
            session.x = *x;
            session.y = *y;
        }
        self.broadcast(&packet, Some(username))
    }

    fn handle_disconnect(&mut self, username: &str) -> Vec<Outbound> {
        let packet = Packet::Disconnect {
            username: username.to_string(),
        };
        let mut out = self.broadcast(&packet, None);
        self.sessions.remove(username);
        info!("{} left the game.", username);
        out.extend(self.broadcast(
            &Packet::chat(username, NOTICE_COLOR, " left the game."),
            None,
        ));
        out
    }

    fn handle_chat(
        &mut self,
        username: &str,
        color: u16,
        message: &str,
        addr: SocketAddr,
    ) -> Vec<Outbound> {
        info!("[{}] Message: {}{}", addr, username, message);

        let Some(command) = Command::parse(message) else {
            return self.broadcast(&Packet::chat(username, color, message), None);
        };

        let reply_lines: Vec<String> = match command {
            Command::Kill => {
                return self.broadcast(
                    &Packet::Damage {
                        username: username.to_string(),
                        amount: KILL_DAMAGE,
                    },
                    None,
                );
            }
            Command::List => std::iter::once("Connected players:".to_string())
                .chain(self.sessions.roster_lines())
                .collect(),
            Command::Help => HELP_DOCUMENT.iter().map(|line| line.to_string()).collect(),
            Command::Version => vec![format!("The version is {}", self.version)],
            Command::EasterEgg => vec!["There are no easter eggs here, go away!".to_string()],
            Command::Unknown(word) => {
                debug!("[{}] Unknown command /{}", addr, word);
                vec!["Unknown command, type /help for help".to_string()]
            }
        };

        reply_lines
            .into_iter()
            .map(|line| Outbound::Send {
                packet: Packet::chat(SERVER_NAME, COMMAND_REPLY_COLOR, &format!(": {}", line)),
                addr,
            })
            .collect()
    }

    fn handle_score(&mut self, team: Team, delta: i32) -> Vec<Outbound> {
        let Some(Packet::StartGame { mode, .. }) = &self.running_game else {
            debug!("Ignoring SCORE while no round is running");
            return Vec::new();
        };

        if mode == CAPTURE_THE_FLAG {
            for session in self.sessions.sessions_mut() {
                if session.team == team {
                    session.score += delta;
                }
            }
        }

        let scores: Vec<Packet> = self
            .sessions
            .sessions()
            .iter()
            .map(Session::score_packet)
            .collect();

        let mut out = Vec::with_capacity(scores.len() * self.sessions.len());
        for recipient in self.sessions.sessions() {
            for score in &scores {
                out.push(Outbound::Send {
                    packet: score.clone(),
                    addr: recipient.addr,
                });
            }
        }
        out
    }

    /// Switches every player to a new level and round
    ///
    /// The new level is announced and streamed to every session except the
    /// host, in join order, then all bullets and mines are destroyed and the
    /// STARTGAME is broadcast and remembered for late joiners.
    pub fn start_game(&mut self, mode: &str, map: &str, level: Level) -> shared::Result<Vec<Outbound>> {
        self.level_png = Arc::new(level.to_png()?);
        self.level = level;
        info!(
            "Switching to {} {} at {}",
            mode,
            map,
            self.level.path()
        );

        let mut out = self.broadcast(&self.level_announcement(SERVER_NAME), None);
        for session in self.sessions.sessions() {
            if self.is_host(&session.username) {
                continue;
            }
            out.push(Outbound::PushLevel {
                addr: session.addr,
                png: self.level_png(),
            });
        }

        out.extend(self.broadcast(
            &Packet::Destroy {
                username: SERVER_NAME.to_string(),
                id: DESTROY_ALL,
            },
            None,
        ));

        let start = Packet::StartGame {
            username: SERVER_NAME.to_string(),
            mode: mode.to_string(),
            map: map.to_string(),
            system_path: self.level.path().to_string(),
        };
        out.extend(self.broadcast(&start, None));
        self.running_game = Some(start);

        Ok(out)
    }

    fn level_announcement(&self, username: &str) -> Packet {
        Packet::Level {
            username: username.to_string(),
            path: self.level.path().to_string(),
            width: self.level.width(),
            height: self.level.height(),
        }
    }

    fn is_host(&self, username: &str) -> bool {
        self.host_username.as_deref() == Some(username)
    }

    fn broadcast(&self, packet: &Packet, exclude: Option<&str>) -> Vec<Outbound> {
        self.sessions
            .addrs_except(exclude)
            .into_iter()
            .map(|addr| Outbound::Send {
                packet: packet.clone(),
                addr,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Direction, PROTOCOL_VERSION};
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn relay() -> Relay {
        Relay::new(Level::blank(16, 12), PROTOCOL_VERSION, Some("Host".to_string())).unwrap()
    }

    fn sent_to(out: &[Outbound], to: SocketAddr) -> Vec<Packet> {
        out.iter()
            .filter_map(|o| match o {
                Outbound::Send { packet, addr } if *addr == to => Some(packet.clone()),
                _ => None,
            })
            .collect()
    }

    fn reply(out: &[Outbound]) -> LoginReply {
        assert_eq!(out.len(), 1);
        match &out[0] {
            Outbound::Send { packet, .. } => LoginReply::from_packet(packet).unwrap(),
            other => panic!("unexpected {:?}", other),
        }
    }

    /// Registers and logs in a player, returning the relay output of the LOGIN
    fn join(relay: &mut Relay, name: &str, team: Team, port: u16) -> Vec<Outbound> {
        let request = LoginRequest::Register { team }.to_packet(name, PROTOCOL_VERSION);
        let id = match reply(&relay.handle_packet(request, addr(port))) {
            LoginReply::Accepted { id } => id,
            other => panic!("{} rejected: {:?}", name, other),
        };
        let login = Packet::Login {
            username: name.to_string(),
            id,
            x: 100,
            y: 100,
            team,
        };
        relay.handle_packet(login, addr(port))
    }

    #[test]
    fn test_team_query_creates_nothing() {
        let mut relay = relay();
        let out = relay.handle_packet(
            LoginRequest::TeamQuery.to_packet("Bob", PROTOCOL_VERSION),
            addr(1),
        );
        assert_eq!(reply(&out), LoginReply::TeamCounts { green: 0, red: 0 });
        assert!(relay.sessions().pending().is_empty());
        assert!(relay.sessions().is_empty());
    }

    #[test]
    fn test_team_query_counts_pending_registrations() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);
        join(&mut relay, "C", Team::Green, 3);

        let out = relay.handle_packet(
            LoginRequest::TeamQuery.to_packet("D", "whatever"),
            addr(4),
        );
        assert_eq!(reply(&out), LoginReply::TeamCounts { green: 2, red: 1 });
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut relay = relay();
        let request = LoginRequest::Register { team: Team::Red }.to_packet("Bob", "v0.9");
        let out = relay.handle_packet(request, addr(1));
        assert_eq!(
            reply(&out),
            LoginReply::VersionMismatch {
                server_version: PROTOCOL_VERSION.to_string()
            }
        );
        assert!(!relay.sessions().is_accepted("Bob"));
    }

    #[test]
    fn test_invalid_usernames_are_rejected() {
        let mut relay = relay();
        for name in ["", "!bang", "Server"] {
            let request = LoginRequest::Register { team: Team::Red }.to_packet(name, PROTOCOL_VERSION);
            let out = relay.handle_packet(request, addr(1));
            assert_eq!(
                reply(&out),
                LoginReply::InvalidUsername {
                    username: name.to_string()
                }
            );
        }
        assert!(relay.sessions().pending().is_empty());
    }

    #[test]
    fn test_duplicate_join_rejected_without_growing_table() {
        let mut relay = relay();
        join(&mut relay, "Bob", Team::Green, 1);
        assert_eq!(relay.sessions().len(), 1);

        let request = LoginRequest::Register { team: Team::Red }.to_packet("bOB", PROTOCOL_VERSION);
        let out = relay.handle_packet(request, addr(2));
        assert_eq!(reply(&out), LoginReply::UsernameTaken);
        assert_eq!(relay.sessions().len(), 1);
    }

    #[test]
    fn test_packets_from_unregistered_senders_are_dropped() {
        let mut relay = relay();
        join(&mut relay, "Bob", Team::Green, 1);

        let out = relay.handle_packet(Packet::chat("Mallory", 555, ": hi"), addr(9));
        assert!(out.is_empty());

        let login = Packet::Login {
            username: "Mallory".to_string(),
            id: 99,
            x: 0,
            y: 0,
            team: Team::Red,
        };
        assert!(relay.handle_packet(login, addr(9)).is_empty());
        assert_eq!(relay.sessions().len(), 1);
    }

    #[test]
    fn test_invalid_chat_causes_no_mutation() {
        let mut relay = relay();
        join(&mut relay, "Bob", Team::Green, 1);
        let ids_before = relay.ids.peek();

        let out = relay.handle_datagram(b"04Bob#: missing colour", addr(1));
        assert!(out.is_empty());
        assert_eq!(relay.sessions().len(), 1);
        assert_eq!(relay.ids.peek(), ids_before);
    }

    #[test]
    fn test_login_syncs_roster_both_ways() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);
        let out = join(&mut relay, "C", Team::Green, 3);

        for existing in [addr(1), addr(2)] {
            let logins: Vec<Packet> = sent_to(&out, existing)
                .into_iter()
                .filter(|p| matches!(p, Packet::Login { .. }))
                .collect();
            assert_eq!(logins.len(), 1);
            assert_eq!(logins[0].username(), Some("C"));
        }

        let synthesized: Vec<String> = sent_to(&out, addr(3))
            .into_iter()
            .filter(|p| matches!(p, Packet::Login { .. }))
            .filter_map(|p| p.username().map(str::to_string))
            .collect();
        assert_eq!(synthesized, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(relay.sessions().len(), 3);
    }

    #[test]
    fn test_login_announces_and_pushes_level() {
        let mut relay = relay();
        let out = join(&mut relay, "Bob", Team::Green, 1);

        let to_bob = sent_to(&out, addr(1));
        assert!(to_bob.contains(&Packet::chat("Bob", NOTICE_COLOR, " joined the lobby.")));
        assert!(to_bob.contains(&Packet::Level {
            username: "Bob".to_string(),
            path: "generated".to_string(),
            width: 16,
            height: 12,
        }));
        assert!(out
            .iter()
            .any(|o| matches!(o, Outbound::PushLevel { addr: a, .. } if *a == addr(1))));
    }

    #[test]
    fn test_host_login_skips_level_transfer() {
        let mut relay = relay();
        let out = join(&mut relay, "Host", Team::Green, 1);
        assert!(!out
            .iter()
            .any(|o| matches!(o, Outbound::PushLevel { .. })));
        assert!(!sent_to(&out, addr(1))
            .iter()
            .any(|p| matches!(p, Packet::Level { .. })));
    }

    #[test]
    fn test_move_skips_sender() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);
        join(&mut relay, "C", Team::Red, 3);

        let movement = Packet::Move {
            username: "A".to_string(),
            x: 150,
            y: 200,
            moving: true,
            dir: Direction::Right,
            has_flag: false,
        };
        let out = relay.handle_packet(movement.clone(), addr(1));

        assert_eq!(out.len(), 2);
        assert!(sent_to(&out, addr(1)).is_empty());
        assert_eq!(sent_to(&out, addr(2)), vec![movement.clone()]);
        assert_eq!(sent_to(&out, addr(3)), vec![movement]);
        assert_eq!(relay.sessions().find("A").map(|s| (s.x, s.y)), Some((150, 200)));
    }

    #[test]
    fn test_bullets_and_mines_get_fresh_ids() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);

        let bullet = Packet::Bullet {
            username: "A".to_string(),
            id: -1,
            x: 1,
            y: 2,
            dir: Direction::Up,
            team: Team::Green,
        };
        let first = relay.handle_packet(bullet.clone(), addr(1));
        let second = relay.handle_packet(bullet, addr(1));

        let id_of = |out: &[Outbound]| -> Vec<i32> {
            out.iter()
                .filter_map(|o| match o {
                    Outbound::Send { packet, .. } => packet.entity_id(),
                    _ => None,
                })
                .collect()
        };
        let first_ids = id_of(&first);
        let second_ids = id_of(&second);
        assert_eq!(first_ids.len(), 2);
        assert!(first_ids.iter().all(|id| *id == first_ids[0] && *id > 0));
        assert!(second_ids[0] > first_ids[0]);
    }

    #[test]
    fn test_unknown_command_only_reaches_sender() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);

        let out = relay.handle_packet(Packet::chat("A", 555, ": /dance"), addr(1));
        assert_eq!(
            out,
            vec![Outbound::Send {
                packet: Packet::chat("SERVER", 0, ": Unknown command, type /help for help"),
                addr: addr(1),
            }]
        );
    }

    #[test]
    fn test_plain_chat_reaches_everyone() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);

        let chat = Packet::chat("A", 555, ": hello, all");
        let out = relay.handle_packet(chat.clone(), addr(1));
        assert_eq!(sent_to(&out, addr(1)), vec![chat.clone()]);
        assert_eq!(sent_to(&out, addr(2)), vec![chat]);
    }

    #[test]
    fn test_list_and_help_commands() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);

        let out = relay.handle_packet(Packet::chat("B", 555, ": /list"), addr(2));
        let lines: Vec<Packet> = sent_to(&out, addr(2));
        assert_eq!(out.len(), 2);
        assert_eq!(lines[0], Packet::chat("SERVER", 0, ": Connected players:"));
        assert_eq!(lines[1], Packet::chat("SERVER", 0, ": G: A^1, R: B^2"));

        let out = relay.handle_packet(Packet::chat("B", 555, ": /HELP"), addr(2));
        assert_eq!(out.len(), HELP_DOCUMENT.len());

        let out = relay.handle_packet(Packet::chat("B", 555, ": /version"), addr(2));
        assert_eq!(
            sent_to(&out, addr(2)),
            vec![Packet::chat("SERVER", 0, ": The version is v1.1.01")]
        );
    }

    #[test]
    fn test_kill_command_broadcasts_damage() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);

        let out = relay.handle_packet(Packet::chat("B", 555, ": /kill"), addr(2));
        let damage = Packet::Damage {
            username: "B".to_string(),
            amount: 9001,
        };
        assert_eq!(sent_to(&out, addr(1)), vec![damage.clone()]);
        assert_eq!(sent_to(&out, addr(2)), vec![damage]);
    }

    #[test]
    fn test_disconnect_broadcasts_then_removes() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);

        let out = relay.handle_packet(
            Packet::Disconnect {
                username: "B".to_string(),
            },
            addr(2),
        );

        assert!(sent_to(&out, addr(2)).contains(&Packet::Disconnect {
            username: "B".to_string()
        }));
        assert_eq!(
            sent_to(&out, addr(1)),
            vec![
                Packet::Disconnect {
                    username: "B".to_string()
                },
                Packet::chat("B", NOTICE_COLOR, " left the game."),
            ]
        );
        assert_eq!(relay.sessions().len(), 1);
        assert!(!relay.sessions().is_accepted("B"));

        // further packets from B are no longer relayed
        assert!(relay
            .handle_packet(Packet::chat("B", 555, ": still here?"), addr(2))
            .is_empty());
    }

    #[test]
    fn test_score_ignored_without_round() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        let score = Packet::Score {
            username: "A".to_string(),
            team: Team::Green,
            score: 1,
        };
        assert!(relay.handle_packet(score, addr(1)).is_empty());
    }

    #[test]
    fn test_ctf_score_accumulates_per_team() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        join(&mut relay, "B", Team::Green, 2);
        join(&mut relay, "C", Team::Red, 3);
        relay.start_game("CTF", "Arena", Level::blank(20, 20)).unwrap();

        let out = relay.handle_packet(
            Packet::Score {
                username: "A".to_string(),
                team: Team::Green,
                score: 2,
            },
            addr(1),
        );

        assert_eq!(out.len(), 9);
        let to_c = sent_to(&out, addr(3));
        assert_eq!(
            to_c,
            vec![
                Packet::Score {
                    username: "A".to_string(),
                    team: Team::Green,
                    score: 2
                },
                Packet::Score {
                    username: "B".to_string(),
                    team: Team::Green,
                    score: 2
                },
                Packet::Score {
                    username: "C".to_string(),
                    team: Team::Red,
                    score: 0
                },
            ]
        );
    }

    #[test]
    fn test_start_game_sequence() {
        let mut relay = relay();
        join(&mut relay, "Host", Team::Green, 1);
        join(&mut relay, "B", Team::Red, 2);

        let out = relay
            .start_game("CTF", "Arena", Level::blank(30, 20))
            .unwrap();

        let pushes: Vec<SocketAddr> = out
            .iter()
            .filter_map(|o| match o {
                Outbound::PushLevel { addr, .. } => Some(*addr),
                _ => None,
            })
            .collect();
        assert_eq!(pushes, vec![addr(2)]);

        let to_b = sent_to(&out, addr(2));
        assert!(matches!(
            &to_b[0],
            Packet::Level { username, width: 30, height: 20, .. } if username == "SERVER"
        ));
        assert_eq!(
            to_b[1],
            Packet::Destroy {
                username: "SERVER".to_string(),
                id: DESTROY_ALL
            }
        );
        assert!(matches!(&to_b[2], Packet::StartGame { mode, .. } if mode == "CTF"));
        assert!(relay.running_game().is_some());
        assert_eq!(relay.level().width(), 30);
    }

    #[test]
    fn test_late_joiner_gets_round_and_team_score() {
        let mut relay = relay();
        join(&mut relay, "A", Team::Green, 1);
        relay.start_game("CTF", "Arena", Level::blank(20, 20)).unwrap();
        relay.handle_packet(
            Packet::Score {
                username: "A".to_string(),
                team: Team::Green,
                score: 3,
            },
            addr(1),
        );

        let out = join(&mut relay, "B", Team::Green, 2);
        let to_b = sent_to(&out, addr(2));
        assert!(to_b.contains(&Packet::chat("B", NOTICE_COLOR, " joined the game.")));
        assert!(to_b
            .iter()
            .any(|p| matches!(p, Packet::StartGame { map, .. } if map == "Arena")));
        assert_eq!(relay.sessions().find("B").map(|s| s.score), Some(3));
    }
}
