//! Session bookkeeping for the relay
//!
//! This module tracks who may talk to the server and who is playing:
//! - Pending registrations created when a TESTLOGIN is approved
//! - Live sessions created when the matching LOGIN arrives
//! - The entity id counter shared by sessions, bullets and mines
//!
//! Nothing here expires. A registration or session disappears only when the
//! owner sends DISCONNECT; a peer that silently goes away stays listed.

use log::{debug, info};
use shared::{Packet, Team};
use std::net::SocketAddr;

/// A logged-in player as the server sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub team: Team,
    pub id: i32,
    pub addr: SocketAddr,
    pub x: i32,
    pub y: i32,
    pub score: i32,
}

impl Session {
    pub fn new(username: &str, team: Team, id: i32, addr: SocketAddr, x: i32, y: i32) -> Self {
        Self {
            username: username.to_string(),
            team,
            id,
            addr,
            x,
            y,
            score: 0,
        }
    }

    /// LOGIN packet describing this session to a newly joined player
    pub fn login_packet(&self) -> Packet {
        Packet::Login {
            username: self.username.clone(),
            id: self.id,
            x: self.x,
            y: self.y,
            team: self.team,
        }
    }

    pub fn score_packet(&self) -> Packet {
        Packet::Score {
            username: self.username.clone(),
            team: self.team,
            score: self.score,
        }
    }
}

/// Identity approved by TESTLOGIN, waiting for (or backing) a LOGIN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRegistration {
    pub team: Team,
    pub username: String,
    pub id: i32,
}

impl PendingRegistration {
    /// Entry shown by `/list`, e.g. `G: Bob^4`
    pub fn roster_entry(&self) -> String {
        format!("{}: {}^{}", self.team.initial(), self.username, self.id)
    }
}

/// Monotonic entity id source
///
/// Ids start at 1 and increase by one per allocation. Should the counter
/// ever wrap into the small negative range used as protocol markers
/// (-9..=-1), it restarts at 1.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: i32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(next: i32) -> Self {
        Self { next }
    }

    /// Returns a fresh id
    pub fn allocate(&mut self) -> i32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        if self.next > -10 && self.next < 0 {
            self.next = 1;
        }
        debug!("Allocated entity id {}", id);
        id
    }

    pub fn peek(&self) -> i32 {
        self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered registry of live sessions and pending registrations
///
/// Sessions keep their join order so that roster syncs and score pushes
/// are deterministic. Username comparisons for the duplicate check are
/// case-insensitive; the accepted-sender gate compares exactly, as the
/// name was sanitized by the client before registration.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Vec<Session>,
    pending: Vec<PendingRegistration>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session unless one with the same name (any case) exists
    ///
    /// Returns false for a duplicate; the existing entry is left untouched.
    pub fn add(&mut self, session: Session) -> bool {
        if self.is_taken(&session.username) {
            debug!("Session {} already present", session.username);
            return false;
        }
        info!(
            "Session {} ({}, id {}) added from {}",
            session.username, session.team, session.id, session.addr
        );
        self.sessions.push(session);
        true
    }

    /// Removes the session and its pending registration
    pub fn remove(&mut self, username: &str) -> Option<Session> {
        self.remove_pending(username);
        let index = self
            .sessions
            .iter()
            .position(|s| s.username.eq_ignore_ascii_case(username))?;
        let session = self.sessions.remove(index);
        info!("Session {} removed", session.username);
        Some(session)
    }

    pub fn find(&self, username: &str) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.username.eq_ignore_ascii_case(username))
    }

    pub fn find_mut(&mut self, username: &str) -> Option<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|s| s.username.eq_ignore_ascii_case(username))
    }

    /// Whether a live session already uses this name, ignoring case
    pub fn is_taken(&self, username: &str) -> bool {
        self.find(username).is_some()
    }

    pub fn register_pending(&mut self, team: Team, username: &str, id: i32) {
        debug!("Pending registration {} for {} on {}", id, username, team);
        self.pending.push(PendingRegistration {
            team,
            username: username.to_string(),
            id,
        });
    }

    pub fn remove_pending(&mut self, username: &str) -> Option<PendingRegistration> {
        let index = self.pending.iter().position(|p| p.username == username)?;
        Some(self.pending.remove(index))
    }

    /// Whether packets naming this user may pass the relay
    pub fn is_accepted(&self, username: &str) -> bool {
        self.pending.iter().any(|p| p.username == username)
    }

    /// Pending registrations per team, as (green, red)
    pub fn team_counts(&self) -> (i32, i32) {
        self.pending
            .iter()
            .fold((0, 0), |(green, red), p| match p.team {
                Team::Green => (green + 1, red),
                Team::Red => (green, red + 1),
            })
    }

    /// Roster of pending registrations, four entries per line
    pub fn roster_lines(&self) -> Vec<String> {
        self.pending
            .chunks(4)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(PendingRegistration::roster_entry)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut()
    }

    pub fn pending(&self) -> &[PendingRegistration] {
        &self.pending
    }

    /// Addresses of every session, optionally skipping one user
    pub fn addrs_except(&self, exclude: Option<&str>) -> Vec<SocketAddr> {
        self.sessions
            .iter()
            .filter(|s| exclude.map_or(true, |name| !s.username.eq_ignore_ascii_case(name)))
            .map(|s| s.addr)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn test_id_allocation_is_strictly_increasing() {
        let mut ids = IdAllocator::new();
        let allocated: Vec<i32> = (0..100).map(|_| ids.allocate()).collect();
        assert_eq!(allocated[0], 1);
        assert!(allocated.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_id_allocation_skips_marker_range() {
        let mut ids = IdAllocator::starting_at(-11);
        assert_eq!(ids.allocate(), -11);
        assert_eq!(ids.allocate(), -10);
        // -9 would collide with protocol markers
        assert_eq!(ids.peek(), 1);
        assert_eq!(ids.allocate(), 1);

        let mut ids = IdAllocator::starting_at(i32::MAX);
        assert_eq!(ids.allocate(), i32::MAX);
        assert_eq!(ids.allocate(), i32::MIN);
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let mut table = SessionTable::new();
        assert!(table.add(Session::new("Bob", Team::Green, 1, addr(5000), 100, 100)));
        assert!(!table.add(Session::new("BOB", Team::Red, 2, addr(5001), 0, 0)));

        assert_eq!(table.len(), 1);
        let bob = table.find("bob").unwrap();
        assert_eq!(bob.team, Team::Green);
        assert_eq!(bob.addr, addr(5000));
    }

    #[test]
    fn test_remove_drops_pending_registration_too() {
        let mut table = SessionTable::new();
        table.register_pending(Team::Red, "Eve", 3);
        table.add(Session::new("Eve", Team::Red, 3, addr(5000), 0, 0));
        assert!(table.is_accepted("Eve"));

        let removed = table.remove("Eve").unwrap();
        assert_eq!(removed.id, 3);
        assert!(table.is_empty());
        assert!(!table.is_accepted("Eve"));
        assert!(table.remove("Eve").is_none());
    }

    #[test]
    fn test_accepted_gate_is_exact() {
        let mut table = SessionTable::new();
        table.register_pending(Team::Green, "Bob", 1);
        assert!(table.is_accepted("Bob"));
        assert!(!table.is_accepted("bob"));
        assert!(!table.is_accepted("Alice"));
    }

    #[test]
    fn test_team_counts_and_roster() {
        let mut table = SessionTable::new();
        let names = ["A", "B", "C", "D", "E"];
        for (i, name) in names.iter().enumerate() {
            let team = if i % 2 == 0 { Team::Green } else { Team::Red };
            table.register_pending(team, name, i as i32 + 1);
        }

        assert_eq!(table.team_counts(), (3, 2));
        assert_eq!(
            table.roster_lines(),
            vec![
                "G: A^1, R: B^2, G: C^3, R: D^4".to_string(),
                "G: E^5".to_string()
            ]
        );
    }

    #[test]
    fn test_addrs_except() {
        let mut table = SessionTable::new();
        table.add(Session::new("A", Team::Green, 1, addr(1), 0, 0));
        table.add(Session::new("B", Team::Red, 2, addr(2), 0, 0));
        table.add(Session::new("C", Team::Red, 3, addr(3), 0, 0));

        assert_eq!(table.addrs_except(None), vec![addr(1), addr(2), addr(3)]);
        assert_eq!(table.addrs_except(Some("b")), vec![addr(1), addr(3)]);
    }

    #[test]
    fn test_login_packet_reflects_last_position() {
        let mut session = Session::new("Bob", Team::Red, 9, addr(1), 10, 20);
        session.x = 50;
        assert_eq!(
            session.login_packet(),
            Packet::Login {
                username: "Bob".to_string(),
                id: 9,
                x: 50,
                y: 20,
                team: Team::Red,
            }
        );
    }
}
