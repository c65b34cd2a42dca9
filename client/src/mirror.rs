//! Client-side mirror of the shared game state
//!
//! The receive loop applies remote deltas here and the tick loop advances
//! it; a renderer only ever reads a [`MirrorSnapshot`]. Remote players are
//! not snapped to the positions they report. Each update starts a tween of
//! [`UPDATE_RATE`] ticks from the previous target to the new one, after
//! which the rendered position rests on the target.
//!
//! The tick also runs the rules only the local player can decide: bullet and
//! mine hits, capture-the-flag pickups and captures, health regeneration and
//! the respawn countdown. Each produces packets for the server and never
//! changes another player's state directly.

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use shared::{
    Direction, Level, NetError, Packet, Result, Team, BULLET_DAMAGE, BULLET_SPEED, DESTROY_ALL,
    MINE_DAMAGE, PLAYER_SPEED, STARTING_HEALTH, TICKS_PER_SECOND, TILE_PIXELS, UPDATE_RATE,
};
use std::collections::{BTreeMap, VecDeque};

/// Chat lines kept for display
pub const CHAT_HISTORY: usize = 64;

/// A bullet hits when it is inside this box around the player's origin
const BULLET_HIT_MIN: i32 = -15;
const BULLET_HIT_MAX: i32 = 47;
/// A mine triggers within this distance on both axes
const MINE_TRIGGER_RANGE: i32 = 31;
/// A base is touched when its origin lies in `[-31, 31)` of the player's
const FLAG_REACH: i32 = 31;

/// Ticks between one point heals while hurt
pub const HEALTH_REGEN_TICKS: u32 = 300;
/// Ticks spent dead before moving back to the team spawn
pub const RESPAWN_TICKS: u32 = 10 * TICKS_PER_SECOND as u32;
/// Dead ticks after which the death message goes out
const DEATH_CHAT_TICK: u32 = 10;

pub const CAPTURE_CHAT_COLOR: u16 = 534;
pub const DEATH_CHAT_COLOR: u16 = 5;

pub const DEATH_MESSAGES: &[&str] = &[
    "fell out of the world.",
    "crashed and burned.",
    "exploded.",
    "died in a fireball.",
    "fell off a cliff.",
    "completed their life.",
    "didn't respond fast enough.",
    "was slam dunked.",
    "was rekt.",
    "didn't see that coming.",
    "needs to get better at this game.",
    "ascended to the afterlife.",
];

fn apply_health(health: i32, amount: i32) -> i32 {
    (health - amount).clamp(0, STARTING_HEALTH)
}

/// Another player, smoothed between reported positions
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub username: String,
    pub id: i32,
    pub team: Team,
    pub moving: bool,
    pub dir: Direction,
    pub has_flag: bool,
    pub health: i32,
    pub score: i32,
    target: (i32, i32),
    tween_from: (i32, i32),
    render: (f64, f64),
    tween_frame: u32,
}

impl RemotePlayer {
    pub fn new(username: &str, id: i32, team: Team, x: i32, y: i32) -> Self {
        Self {
            username: username.to_string(),
            id,
            team,
            moving: false,
            dir: Direction::default(),
            has_flag: false,
            health: STARTING_HEALTH,
            score: 0,
            target: (x, y),
            tween_from: (x, y),
            render: (x as f64, y as f64),
            tween_frame: UPDATE_RATE,
        }
    }

    /// Starts a new tween from the previous target towards `(x, y)`
    pub fn set_target(&mut self, x: i32, y: i32) {
        self.tween_from = self.target;
        self.render = (self.target.0 as f64, self.target.1 as f64);
        self.target = (x, y);
        self.tween_frame = 0;
    }

    pub fn tick(&mut self) {
        if self.tween_frame < UPDATE_RATE {
            let steps = UPDATE_RATE as f64;
            self.render.0 += (self.target.0 - self.tween_from.0) as f64 / steps;
            self.render.1 += (self.target.1 - self.tween_from.1) as f64 / steps;
            self.tween_frame += 1;
        } else {
            self.render = (self.target.0 as f64, self.target.1 as f64);
        }
    }

    /// Last reported position
    pub fn position(&self) -> (i32, i32) {
        self.target
    }

    /// Position to draw this tick
    pub fn render_position(&self) -> (f64, f64) {
        self.render
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

/// The player controlled by this client; its position is authoritative here
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlayer {
    pub username: String,
    pub id: i32,
    pub team: Team,
    pub x: i32,
    pub y: i32,
    pub dir: Direction,
    pub moving: bool,
    pub has_flag: bool,
    pub health: i32,
    pub score: i32,
    heading: Option<Direction>,
    ticks: u64,
    publish_stop: bool,
    regen_ticks: u32,
    dead_ticks: u32,
}

impl LocalPlayer {
    pub fn new(username: &str, id: i32, team: Team, x: i32, y: i32) -> Self {
        Self {
            username: username.to_string(),
            id,
            team,
            x,
            y,
            dir: Direction::default(),
            moving: false,
            has_flag: false,
            health: STARTING_HEALTH,
            score: 0,
            heading: None,
            ticks: 0,
            publish_stop: false,
            regen_ticks: HEALTH_REGEN_TICKS,
            dead_ticks: 0,
        }
    }

    pub fn steer(&mut self, dir: Direction) {
        self.heading = Some(dir);
        self.dir = dir;
    }

    pub fn stop(&mut self) {
        self.heading = None;
    }

    pub fn place_at(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
        self.moving = false;
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    /// Applies a DAMAGE amount; any hit or heal restarts the regen wait
    fn take_damage(&mut self, amount: i32) {
        self.health = apply_health(self.health, amount);
        self.regen_ticks = 0;
        if !self.is_alive() {
            self.stop();
        }
    }

    /// Whether a one point heal is due this tick
    fn regen_due(&mut self) -> bool {
        if self.is_alive()
            && self.health < STARTING_HEALTH
            && self.regen_ticks >= HEALTH_REGEN_TICKS
        {
            self.regen_ticks = 0;
            return true;
        }
        self.regen_ticks = (self.regen_ticks + 1).min(HEALTH_REGEN_TICKS);
        false
    }

    pub fn move_packet(&self) -> Packet {
        Packet::Move {
            username: self.username.clone(),
            x: self.x,
            y: self.y,
            moving: self.moving,
            dir: self.dir,
            has_flag: self.has_flag,
        }
    }

    /// Advances one tick, returning a MOVE when one is due
    ///
    /// While moving a MOVE goes out every [`UPDATE_RATE`] ticks; after
    /// stopping, one last MOVE is published on the next such tick.
    pub fn tick(&mut self, level: Option<&Level>) -> Option<Packet> {
        self.ticks += 1;
        let publish_tick = self.ticks % u64::from(UPDATE_RATE) == 0;

        match self.heading.filter(|_| self.is_alive()) {
            Some(dir) => {
                let (dx, dy) = dir.delta();
                self.x += dx * PLAYER_SPEED;
                self.y += dy * PLAYER_SPEED;
                if let Some(level) = level {
                    self.x = self.x.clamp(0, (level.pixel_width() - TILE_PIXELS).max(0));
                    self.y = self.y.clamp(0, (level.pixel_height() - TILE_PIXELS).max(0));
                }
                self.moving = true;
                self.publish_stop = true;
                publish_tick.then(|| self.move_packet())
            }
            None => {
                self.moving = false;
                if self.publish_stop && publish_tick {
                    self.publish_stop = false;
                    Some(self.move_packet())
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bullet {
    pub id: i32,
    pub owner: String,
    pub team: Team,
    pub x: i32,
    pub y: i32,
    pub dir: Direction,
    /// Immune bullets never damage the local player
    pub immune: bool,
}

impl Bullet {
    fn advance(&mut self) {
        let (dx, dy) = self.dir.delta();
        self.x += dx * BULLET_SPEED;
        self.y += dy * BULLET_SPEED;
    }

    fn hits(&self, x: i32, y: i32) -> bool {
        self.x >= x + BULLET_HIT_MIN
            && self.x < x + BULLET_HIT_MAX
            && self.y >= y + BULLET_HIT_MIN
            && self.y < y + BULLET_HIT_MAX
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mine {
    pub id: i32,
    pub owner: String,
    pub team: Team,
    pub x: i32,
    pub y: i32,
    pub immune: bool,
}

impl Mine {
    fn triggered_by(&self, x: i32, y: i32) -> bool {
        (self.x - x).abs() < MINE_TRIGGER_RANGE && (self.y - y).abs() < MINE_TRIGGER_RANGE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagBase {
    pub team: Team,
    pub x: i32,
    pub y: i32,
}

impl FlagBase {
    fn reached_by(&self, x: i32, y: i32) -> bool {
        (-FLAG_REACH..FLAG_REACH).contains(&(self.x - x))
            && (-FLAG_REACH..FLAG_REACH).contains(&(self.y - y))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub username: String,
    pub color: u16,
    pub message: String,
}

/// Read-only copy handed to renderers
#[derive(Debug, Clone, Default)]
pub struct MirrorSnapshot {
    pub local: Option<LocalPlayer>,
    pub players: Vec<RemotePlayer>,
    pub bullets: Vec<Bullet>,
    pub mines: Vec<Mine>,
    pub flags: Vec<FlagBase>,
    pub chat: Vec<ChatLine>,
    pub mode: Option<String>,
    pub level: Option<(String, u32, u32)>,
}

#[derive(Debug, Default)]
pub struct EntityMirror {
    local: Option<LocalPlayer>,
    players: BTreeMap<String, RemotePlayer>,
    bullets: BTreeMap<i32, Bullet>,
    mines: BTreeMap<i32, Mine>,
    flags: Vec<FlagBase>,
    chat: VecDeque<ChatLine>,
    mode: Option<String>,
    level: Option<Level>,
}

impl EntityMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local(&mut self, player: LocalPlayer) {
        self.local = Some(player);
    }

    pub fn local(&self) -> Option<&LocalPlayer> {
        self.local.as_ref()
    }

    pub fn local_mut(&mut self) -> Option<&mut LocalPlayer> {
        self.local.as_mut()
    }

    fn is_local(&self, username: &str) -> bool {
        self.local.as_ref().map_or(false, |p| p.username == username)
    }

    /// Whether an entity owned by `owner` on `team` must not hurt us
    pub fn is_friendly(&self, owner: &str, team: Team) -> bool {
        self.local
            .as_ref()
            .map_or(false, |p| p.username == owner || p.team == team)
    }

    pub fn level(&self) -> Option<&Level> {
        self.level.as_ref()
    }

    pub fn set_level(&mut self, level: Level) {
        debug!(
            "Level {} ({}x{}) ready",
            level.path(),
            level.width(),
            level.height()
        );
        self.level = Some(level);
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    pub fn player(&self, username: &str) -> Option<&RemotePlayer> {
        self.players.get(username)
    }

    pub fn players(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    pub fn bullet(&self, id: i32) -> Option<&Bullet> {
        self.bullets.get(&id)
    }

    pub fn mine(&self, id: i32) -> Option<&Mine> {
        self.mines.get(&id)
    }

    pub fn bullet_count(&self) -> usize {
        self.bullets.len()
    }

    pub fn mine_count(&self) -> usize {
        self.mines.len()
    }

    pub fn flags(&self) -> &[FlagBase] {
        &self.flags
    }

    /// A base holds its flag unless someone of the other team carries it
    pub fn flag_present(&self, base: Team) -> bool {
        let raider = base.opponent();
        let local_carries = self
            .local
            .as_ref()
            .map_or(false, |p| p.team == raider && p.has_flag);
        let remote_carries = self
            .players
            .values()
            .any(|p| p.team == raider && p.has_flag);
        !(local_carries || remote_carries)
    }

    pub fn chat(&self) -> impl Iterator<Item = &ChatLine> {
        self.chat.iter()
    }

    /// Adds or refreshes a player announced by LOGIN
    pub fn upsert_player(&mut self, username: &str, id: i32, team: Team, x: i32, y: i32) {
        if self.is_local(username) {
            return;
        }
        match self.players.get_mut(username) {
            Some(player) => {
                player.id = id;
                player.team = team;
                player.set_target(x, y);
            }
            None => {
                debug!("{} ({}) entered at ({}, {})", username, team, x, y);
                self.players
                    .insert(username.to_string(), RemotePlayer::new(username, id, team, x, y));
            }
        }
    }

    pub fn move_player(
        &mut self,
        username: &str,
        x: i32,
        y: i32,
        moving: bool,
        dir: Direction,
        has_flag: bool,
    ) {
        let Some(player) = self.players.get_mut(username) else {
            debug!("MOVE for unknown player {}", username);
            return;
        };
        player.set_target(x, y);
        player.moving = moving;
        player.dir = dir;
        player.has_flag = has_flag;
    }

    /// Drops a player together with every mine they own
    pub fn remove_player(&mut self, username: &str) -> Option<RemotePlayer> {
        self.mines.retain(|_, mine| mine.owner != username);
        self.players.remove(username)
    }

    pub fn spawn_bullet(
        &mut self,
        owner: &str,
        id: i32,
        x: i32,
        y: i32,
        dir: Direction,
        team: Team,
    ) -> Result<()> {
        if id <= 0 {
            return Err(NetError::Fatal(format!(
                "bullet from {} carries unassigned id {}",
                owner, id
            )));
        }
        let immune = self.is_friendly(owner, team);
        self.bullets.insert(
            id,
            Bullet {
                id,
                owner: owner.to_string(),
                team,
                x,
                y,
                dir,
                immune,
            },
        );
        Ok(())
    }

    pub fn spawn_mine(&mut self, owner: &str, id: i32, x: i32, y: i32, team: Team) -> Result<()> {
        if id <= 0 {
            return Err(NetError::Fatal(format!(
                "mine from {} carries unassigned id {}",
                owner, id
            )));
        }
        let immune = self.is_friendly(owner, team);
        self.mines.insert(
            id,
            Mine {
                id,
                owner: owner.to_string(),
                team,
                x,
                y,
                immune,
            },
        );
        Ok(())
    }

    /// Removes one bullet or mine, or all of them for [`DESTROY_ALL`]
    pub fn destroy(&mut self, id: i32) -> bool {
        if id == DESTROY_ALL {
            self.bullets.clear();
            self.mines.clear();
            return true;
        }
        let found = self.bullets.remove(&id).is_some() | self.mines.remove(&id).is_some();
        if !found {
            warn!("The id {} was not found", id);
        }
        found
    }

    /// Positive amounts hurt, negative amounts heal
    pub fn damage(&mut self, username: &str, amount: i32) {
        if let Some(local) = self.local.as_mut().filter(|p| p.username == username) {
            local.take_damage(amount);
        } else if let Some(player) = self.players.get_mut(username) {
            player.health = apply_health(player.health, amount);
        }
    }

    pub fn set_score(&mut self, username: &str, score: i32) {
        if let Some(local) = self.local.as_mut().filter(|p| p.username == username) {
            local.score = score;
        } else if let Some(player) = self.players.get_mut(username) {
            player.score = score;
        }
    }

    pub fn push_chat(&mut self, username: &str, color: u16, message: &str) {
        if self.chat.len() == CHAT_HISTORY {
            self.chat.pop_front();
        }
        self.chat.push_back(ChatLine {
            username: username.to_string(),
            color,
            message: message.to_string(),
        });
    }

    /// Moves the local player to its team spawn without its flag
    pub fn respawn_local(&mut self) -> Option<Packet> {
        let team = self.local.as_ref()?.team;
        let (x, y) = match &self.level {
            Some(level) => level.spawn_point(team),
            None => Level::default().spawn_point(team),
        };
        let local = self.local.as_mut()?;
        local.place_at(x, y);
        local.stop();
        local.has_flag = false;
        Some(local.move_packet())
    }

    /// Records the round and lays out capture-the-flag bases
    pub fn start_round(&mut self, mode: &str, capture_the_flag: bool) {
        self.mode = Some(mode.to_string());
        self.flags.clear();
        if let Some(local) = self.local.as_mut() {
            local.has_flag = false;
        }
        if capture_the_flag {
            if let Some(level) = &self.level {
                for team in [Team::Green, Team::Red] {
                    let (x, y) = level.flag_base(team);
                    self.flags.push(FlagBase { team, x, y });
                }
            }
        }
    }

    /// Advances one tick; returns packets the local player must publish
    pub fn tick(&mut self) -> Vec<Packet> {
        let mut out = Vec::new();

        if let Some(local) = self.local.as_mut() {
            if let Some(movement) = local.tick(self.level.as_ref()) {
                out.push(movement);
            }
        }

        for player in self.players.values_mut() {
            player.tick();
        }

        for bullet in self.bullets.values_mut() {
            bullet.advance();
        }
        if let Some(level) = &self.level {
            self.bullets.retain(|_, b| level.contains(b.x, b.y));
        }

        let Some(local) = self.local.as_ref() else {
            return out;
        };
        let (px, py) = (local.x, local.y);
        let username = local.username.clone();

        for bullet in self.bullets.values_mut() {
            if !bullet.immune && bullet.hits(px, py) {
                bullet.immune = true;
                out.push(Packet::Damage {
                    username: username.clone(),
                    amount: BULLET_DAMAGE,
                });
            }
        }

        for mine in self.mines.values_mut() {
            if !mine.immune && mine.triggered_by(px, py) {
                mine.immune = true;
                out.push(Packet::Damage {
                    username: username.clone(),
                    amount: MINE_DAMAGE,
                });
                out.push(Packet::Destroy {
                    username: username.clone(),
                    id: mine.id,
                });
            }
        }

        self.tick_flags(&mut out);
        self.tick_health(&mut out);
        out
    }

    /// Picks up the enemy flag on contact and scores it at the own base
    fn tick_flags(&mut self, out: &mut Vec<Packet>) {
        let Some(local) = self.local.as_ref().filter(|p| p.is_alive()) else {
            return;
        };
        let team = local.team;
        let (px, py) = (local.x, local.y);
        let enemy_flag_present = self.flag_present(team.opponent());
        let touched: Vec<Team> = self
            .flags
            .iter()
            .filter(|base| base.reached_by(px, py))
            .map(|base| base.team)
            .collect();

        let Some(local) = self.local.as_mut() else {
            return;
        };
        for base in touched {
            if base == team.opponent() && enemy_flag_present && !local.has_flag {
                info!("{} picked up the {} flag", local.username, base);
                local.has_flag = true;
                out.push(local.move_packet());
            } else if base == team && local.has_flag {
                info!("{} captured the flag for {}", local.username, team);
                local.has_flag = false;
                out.push(Packet::chat(
                    &local.username,
                    CAPTURE_CHAT_COLOR,
                    &format!(": Team {} captured the flag!!", team),
                ));
                out.push(Packet::Score {
                    username: local.username.clone(),
                    team,
                    score: 1,
                });
                out.push(local.move_packet());
            }
        }
    }

    /// Regenerates while hurt and runs the respawn countdown while dead
    fn tick_health(&mut self, out: &mut Vec<Packet>) {
        let Some(local) = self.local.as_mut() else {
            return;
        };

        if local.regen_due() {
            out.push(Packet::Damage {
                username: local.username.clone(),
                amount: -1,
            });
        }

        if local.is_alive() {
            local.dead_ticks = 0;
            return;
        }
        local.dead_ticks += 1;
        if local.dead_ticks == DEATH_CHAT_TICK {
            let message = DEATH_MESSAGES
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or("died.");
            out.push(Packet::chat(
                &local.username,
                DEATH_CHAT_COLOR,
                &format!(" {}", message),
            ));
        }
        if local.dead_ticks < RESPAWN_TICKS {
            return;
        }

        local.dead_ticks = 0;
        // the echoed heal is clamped at full health
        local.take_damage(-STARTING_HEALTH);
        out.push(Packet::Damage {
            username: local.username.clone(),
            amount: -STARTING_HEALTH,
        });
        if let Some(movement) = self.respawn_local() {
            out.push(movement);
        }
    }

    pub fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot {
            local: self.local.clone(),
            players: self.players.values().cloned().collect(),
            bullets: self.bullets.values().cloned().collect(),
            mines: self.mines.values().cloned().collect(),
            flags: self.flags.clone(),
            chat: self.chat.iter().cloned().collect(),
            mode: self.mode.clone(),
            level: self
                .level
                .as_ref()
                .map(|l| (l.path().to_string(), l.width(), l.height())),
        }
    }
}
