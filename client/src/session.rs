//! Applies server packets to the local mirror and decides what to answer

use crate::handshake::Handshake;
use crate::mirror::{EntityMirror, LocalPlayer};
use log::{debug, info};
use shared::{
    Level, LoginReply, NetError, Packet, Result, Team, CAPTURE_THE_FLAG, MAX_MINES,
};
use std::collections::VecDeque;

/// Chat colour used for messages typed by this client
pub const CHAT_COLOR: u16 = 555;

/// What the runtime must do after a packet was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Send(Packet),
    /// Fetch (or, when hosting, load) the announced level
    FetchLevel {
        path: String,
        width: u32,
        height: u32,
    },
}

#[derive(Debug)]
pub struct ClientSession {
    mirror: EntityMirror,
    handshake: Handshake,
    own_mines: VecDeque<i32>,
    is_host: bool,
    spawned: bool,
    /// Announced levels whose fetch has not finished
    pending_levels: usize,
    /// Round mode held back until the pending levels are installed
    deferred_start: Option<String>,
}

impl ClientSession {
    pub fn new(username: &str, version: &str, is_host: bool) -> Result<Self> {
        Ok(Self {
            mirror: EntityMirror::new(),
            handshake: Handshake::new(username, version)?,
            own_mines: VecDeque::new(),
            is_host,
            spawned: false,
            pending_levels: 0,
            deferred_start: None,
        })
    }

    pub fn username(&self) -> &str {
        self.handshake.username()
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn mirror(&self) -> &EntityMirror {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut EntityMirror {
        &mut self.mirror
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn handshake_mut(&mut self) -> &mut Handshake {
        &mut self.handshake
    }

    /// Ids of mines this client placed, oldest first
    pub fn own_mines(&self) -> impl Iterator<Item = &i32> {
        self.own_mines.iter()
    }

    fn spawn_point(&self, team: Team) -> (i32, i32) {
        self.mirror
            .level()
            .map(|level| level.spawn_point(team))
            .unwrap_or_else(|| Level::default().spawn_point(team))
    }

    /// Moves the local player to its team spawn and returns the MOVE to publish
    fn respawn(&mut self) -> Option<Packet> {
        self.mirror.respawn_local()
    }

    /// Sends LOGIN for an approved registration and creates the local player
    pub fn login(&mut self) -> Result<Packet> {
        let team = self
            .handshake
            .team()
            .ok_or_else(|| NetError::Handshake("no team chosen".to_string()))?;
        let (x, y) = self.spawn_point(team);
        let packet = self.handshake.login(x, y)?;
        let id = self.handshake.id().unwrap_or_default();
        self.mirror
            .set_local(LocalPlayer::new(self.handshake.username(), id, team, x, y));
        Ok(packet)
    }

    /// Installs a fetched level; once spawned this re-places the player
    ///
    /// A round that started while the level was still in flight begins here,
    /// so its bases are laid out on the new level.
    pub fn level_ready(&mut self, level: Level) -> Vec<Packet> {
        self.mirror.set_level(level);
        self.pending_levels = self.pending_levels.saturating_sub(1);
        if let Some(movement) = self.take_deferred_start() {
            return vec![movement];
        }
        if self.spawned {
            self.respawn().into_iter().collect()
        } else {
            Vec::new()
        }
    }

    /// A fetch gave up; a held back round starts on the current level
    pub fn level_failed(&mut self) -> Vec<Packet> {
        self.pending_levels = self.pending_levels.saturating_sub(1);
        self.take_deferred_start().into_iter().collect()
    }

    pub fn is_level_pending(&self) -> bool {
        self.pending_levels > 0
    }

    fn take_deferred_start(&mut self) -> Option<Packet> {
        if self.pending_levels > 0 {
            return None;
        }
        let mode = self.deferred_start.take()?;
        self.start_round(&mode)
    }

    fn start_round(&mut self, mode: &str) -> Option<Packet> {
        info!("Round started: {}", mode);
        self.mirror.start_round(mode, mode == CAPTURE_THE_FLAG);
        self.respawn()
    }

    /// Last step of joining: spawn and publish a zero score
    pub fn finish_login(&mut self) -> Vec<Packet> {
        let mut out: Vec<Packet> = self.respawn().into_iter().collect();
        if let Some(local) = self.mirror.local() {
            out.push(Packet::Score {
                username: local.username.clone(),
                team: local.team,
                score: 0,
            });
        }
        self.spawned = true;
        out
    }

    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    pub fn handle_packet(&mut self, packet: Packet) -> Result<Vec<Reaction>> {
        if !packet.is_valid() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();

        match packet {
            Packet::TestLogin { .. } => {
                if let Some(reply) = LoginReply::from_packet(&packet) {
                    self.handshake.on_reply(reply)?;
                }
            }
            Packet::Login {
                username,
                id,
                x,
                y,
                team,
            } => self.mirror.upsert_player(&username, id, team, x, y),
            Packet::Disconnect { username } => {
                if self.mirror.remove_player(&username).is_some() {
                    info!("{} left", username);
                }
            }
            Packet::Move {
                username,
                x,
                y,
                moving,
                dir,
                has_flag,
            } => {
                if username != self.username() {
                    self.mirror
                        .move_player(&username, x, y, moving, dir, has_flag);
                }
            }
            Packet::Chat {
                username,
                color,
                message,
            } => {
                info!("{}{}", username, message);
                self.mirror.push_chat(&username, color, &message);
            }
            Packet::Damage { username, amount } => self.mirror.damage(&username, amount),
            Packet::Bullet {
                username,
                id,
                x,
                y,
                dir,
                team,
            } => self.mirror.spawn_bullet(&username, id, x, y, dir, team)?,
            Packet::Mine {
                username,
                id,
                x,
                y,
                team,
            } => {
                if username == self.username() {
                    self.own_mines.push_back(id);
                    if self.own_mines.len() > MAX_MINES {
                        if let Some(oldest) = self.own_mines.pop_front() {
                            debug!("Mine cap reached, removing mine {}", oldest);
                            out.push(Reaction::Send(Packet::Destroy {
                                username: username.clone(),
                                id: oldest,
                            }));
                        }
                    }
                }
                self.mirror.spawn_mine(&username, id, x, y, team)?;
            }
            Packet::Destroy { id, .. } => {
                self.mirror.destroy(id);
                if id == shared::DESTROY_ALL {
                    self.own_mines.clear();
                } else {
                    self.own_mines.retain(|mine| *mine != id);
                }
            }
            Packet::StartGame { mode, .. } => {
                if self.pending_levels > 0 {
                    debug!("Holding round {} until the level arrives", mode);
                    self.deferred_start = Some(mode);
                } else if let Some(movement) = self.start_round(&mode) {
                    out.push(Reaction::Send(movement));
                }
            }
            Packet::Score {
                username, score, ..
            } => self.mirror.set_score(&username, score),
            Packet::Level {
                path,
                width,
                height,
                ..
            } => {
                info!("Level {} ({}x{}) announced", path, width, height);
                self.pending_levels += 1;
                out.push(Reaction::FetchLevel {
                    path,
                    width,
                    height,
                });
            }
            Packet::Invalid { .. } => {}
        }

        Ok(out)
    }

    /// Advances the mirror one tick; the result must be sent to the server
    pub fn tick(&mut self) -> Vec<Packet> {
        self.mirror.tick()
    }

    pub fn fire(&self) -> Option<Packet> {
        let local = self.mirror.local().filter(|p| p.is_alive())?;
        Some(Packet::Bullet {
            username: local.username.clone(),
            id: -1,
            x: local.x + shared::TILE_PIXELS / 2,
            y: local.y + shared::TILE_PIXELS / 2,
            dir: local.dir,
            team: local.team,
        })
    }

    pub fn place_mine(&self) -> Option<Packet> {
        let local = self.mirror.local().filter(|p| p.is_alive())?;
        Some(Packet::Mine {
            username: local.username.clone(),
            id: -1,
            x: local.x,
            y: local.y,
            team: local.team,
        })
    }

    /// Typed chat goes out as ": text" so commands start at the third character
    pub fn chat(&self, text: &str) -> Packet {
        Packet::chat(self.username(), CHAT_COLOR, &format!(": {}", text))
    }

    pub fn disconnect(&self) -> Packet {
        Packet::Disconnect {
            username: self.username().to_string(),
        }
    }
}
