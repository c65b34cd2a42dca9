//! ASCII datagram codec for the twelve game packets
//!
//! Every datagram starts with a two digit, zero padded type tag followed by
//! the packet's fields. Fields are separated by `,` except for chat, which
//! uses `#` so that chat text may carry commas. Receivers read into a
//! zeroed [`PACKET_SIZE`] buffer, so trailing padding is trimmed before the
//! fields are split.
//!
//! Decoding never fails loudly: a datagram whose tag is unknown, whose field
//! count does not match the schema, or whose numeric fields do not parse is
//! returned as [`Packet::Invalid`]. Dispatchers check [`Packet::is_valid`]
//! and drop such packets without touching any state.

use crate::{Direction, Team, PACKET_SIZE};
use log::{debug, trace};
use std::fmt;
use std::net::SocketAddr;

/// Packet kinds and their fixed numeric tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Invalid,
    Login,
    Disconnect,
    Move,
    TestLogin,
    Chat,
    Damage,
    Bullet,
    Mine,
    Destroy,
    StartGame,
    Score,
    Level,
}

impl PacketType {
    /// Every kind that has a wire tag
    pub const ALL: [PacketType; 12] = [
        PacketType::Login,
        PacketType::Disconnect,
        PacketType::Move,
        PacketType::TestLogin,
        PacketType::Chat,
        PacketType::Damage,
        PacketType::Bullet,
        PacketType::Mine,
        PacketType::Destroy,
        PacketType::StartGame,
        PacketType::Score,
        PacketType::Level,
    ];

    pub fn tag(self) -> Option<u8> {
        match self {
            PacketType::Invalid => None,
            PacketType::Login => Some(0),
            PacketType::Disconnect => Some(1),
            PacketType::Move => Some(2),
            PacketType::TestLogin => Some(3),
            PacketType::Chat => Some(4),
            PacketType::Damage => Some(5),
            PacketType::Bullet => Some(6),
            PacketType::Mine => Some(7),
            PacketType::Destroy => Some(10),
            PacketType::StartGame => Some(11),
            PacketType::Score => Some(13),
            PacketType::Level => Some(77),
        }
    }

    pub fn from_id(id: i64) -> PacketType {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.tag().map(i64::from) == Some(id))
            .unwrap_or(PacketType::Invalid)
    }

    /// Looks up the kind for a textual tag; anything non-numeric is `Invalid`
    pub fn lookup(tag: &str) -> PacketType {
        tag.parse::<i64>()
            .map(Self::from_id)
            .unwrap_or(PacketType::Invalid)
    }

    /// Number of fields after the tag
    pub fn field_count(self) -> usize {
        match self {
            PacketType::Invalid => 0,
            PacketType::Disconnect => 1,
            PacketType::Damage | PacketType::Destroy => 2,
            PacketType::Chat | PacketType::Score => 3,
            PacketType::StartGame | PacketType::Level => 4,
            PacketType::Login | PacketType::TestLogin | PacketType::Mine => 5,
            PacketType::Move | PacketType::Bullet => 6,
        }
    }

    pub fn delimiter(self) -> char {
        match self {
            PacketType::Chat => '#',
            _ => ',',
        }
    }

    /// Kinds sent every few ticks; logged at trace level only
    pub fn is_high_frequency(self) -> bool {
        matches!(self, PacketType::Move | PacketType::StartGame)
    }
}

/// A decoded or outbound game packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Login {
        username: String,
        id: i32,
        x: i32,
        y: i32,
        team: Team,
    },
    Disconnect {
        username: String,
    },
    Move {
        username: String,
        x: i32,
        y: i32,
        moving: bool,
        dir: Direction,
        has_flag: bool,
    },
    /// Pre-login exchange. `login_data` is the username on requests and the
    /// reply text on answers, see [`crate::login::LoginReply`].
    TestLogin {
        login_data: String,
        id: i32,
        version: String,
        green: i32,
        red: i32,
    },
    Chat {
        username: String,
        color: u16,
        message: String,
    },
    /// Negative amounts heal
    Damage {
        username: String,
        amount: i32,
    },
    Bullet {
        username: String,
        id: i32,
        x: i32,
        y: i32,
        dir: Direction,
        team: Team,
    },
    Mine {
        username: String,
        id: i32,
        x: i32,
        y: i32,
        team: Team,
    },
    Destroy {
        username: String,
        id: i32,
    },
    StartGame {
        username: String,
        mode: String,
        map: String,
        system_path: String,
    },
    Score {
        username: String,
        team: Team,
        score: i32,
    },
    Level {
        username: String,
        path: String,
        width: u32,
        height: u32,
    },
    /// Unknown tag or a body that does not match the schema of `kind`
    Invalid {
        kind: PacketType,
    },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Login { .. } => PacketType::Login,
            Packet::Disconnect { .. } => PacketType::Disconnect,
            Packet::Move { .. } => PacketType::Move,
            Packet::TestLogin { .. } => PacketType::TestLogin,
            Packet::Chat { .. } => PacketType::Chat,
            Packet::Damage { .. } => PacketType::Damage,
            Packet::Bullet { .. } => PacketType::Bullet,
            Packet::Mine { .. } => PacketType::Mine,
            Packet::Destroy { .. } => PacketType::Destroy,
            Packet::StartGame { .. } => PacketType::StartGame,
            Packet::Score { .. } => PacketType::Score,
            Packet::Level { .. } => PacketType::Level,
            Packet::Invalid { kind } => *kind,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Packet::Invalid { .. })
    }

    /// The sender/subject name carried by the packet
    pub fn username(&self) -> Option<&str> {
        match self {
            Packet::Login { username, .. }
            | Packet::Disconnect { username }
            | Packet::Move { username, .. }
            | Packet::Chat { username, .. }
            | Packet::Damage { username, .. }
            | Packet::Bullet { username, .. }
            | Packet::Mine { username, .. }
            | Packet::Destroy { username, .. }
            | Packet::StartGame { username, .. }
            | Packet::Score { username, .. }
            | Packet::Level { username, .. } => Some(username),
            Packet::TestLogin { login_data, .. } => Some(login_data),
            Packet::Invalid { .. } => None,
        }
    }

    /// Entity id of bullet, mine and destroy packets
    pub fn entity_id(&self) -> Option<i32> {
        match self {
            Packet::Bullet { id, .. } | Packet::Mine { id, .. } | Packet::Destroy { id, .. } => {
                Some(*id)
            }
            _ => None,
        }
    }

    /// Stamps a server allocated id; returns false for packets without one
    pub fn set_entity_id(&mut self, new_id: i32) -> bool {
        match self {
            Packet::Bullet { id, .. } | Packet::Mine { id, .. } | Packet::Destroy { id, .. } => {
                *id = new_id;
                true
            }
            _ => false,
        }
    }

    pub fn chat(username: &str, color: u16, message: &str) -> Packet {
        Packet::Chat {
            username: username.to_string(),
            color,
            message: message.to_string(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn decode(data: &[u8]) -> Packet {
        let text = String::from_utf8_lossy(data);
        let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());

        let kind = match text.get(0..2) {
            Some(tag) => PacketType::lookup(tag),
            None => PacketType::Invalid,
        };
        if kind == PacketType::Invalid {
            return Packet::Invalid { kind };
        }

        let body = &text[2..];
        let fields: Vec<&str> = match kind {
            PacketType::Disconnect => vec![body],
            PacketType::Chat => body.splitn(3, kind.delimiter()).collect(),
            _ => body.split(kind.delimiter()).collect(),
        };

        if fields.len() != kind.field_count() {
            return Packet::Invalid { kind };
        }

        Self::from_fields(kind, &fields).unwrap_or(Packet::Invalid { kind })
    }

    fn from_fields(kind: PacketType, f: &[&str]) -> Option<Packet> {
        let packet = match kind {
            PacketType::Login => Packet::Login {
                username: f[0].to_string(),
                id: f[1].parse().ok()?,
                x: f[2].parse().ok()?,
                y: f[3].parse().ok()?,
                team: f[4].parse().ok()?,
            },
            PacketType::Disconnect => Packet::Disconnect {
                username: f[0].to_string(),
            },
            PacketType::Move => Packet::Move {
                username: f[0].to_string(),
                x: f[1].parse().ok()?,
                y: f[2].parse().ok()?,
                moving: parse_flag(f[3])?,
                dir: Direction::from_wire(f[4].parse().ok()?)?,
                has_flag: parse_flag(f[5])?,
            },
            PacketType::TestLogin => Packet::TestLogin {
                login_data: f[0].to_string(),
                id: f[1].parse().ok()?,
                version: f[2].to_string(),
                green: f[3].parse().ok()?,
                red: f[4].parse().ok()?,
            },
            PacketType::Chat => Packet::Chat {
                username: f[0].to_string(),
                color: f[1].parse().ok()?,
                message: f[2].to_string(),
            },
            PacketType::Damage => Packet::Damage {
                username: f[0].to_string(),
                amount: f[1].parse().ok()?,
            },
            PacketType::Bullet => Packet::Bullet {
                username: f[0].to_string(),
                id: f[1].parse().ok()?,
                x: f[2].parse().ok()?,
                y: f[3].parse().ok()?,
                dir: Direction::from_wire(f[4].parse().ok()?)?,
                team: f[5].parse().ok()?,
            },
            PacketType::Mine => Packet::Mine {
                username: f[0].to_string(),
                id: f[1].parse().ok()?,
                x: f[2].parse().ok()?,
                y: f[3].parse().ok()?,
                team: f[4].parse().ok()?,
            },
            PacketType::Destroy => Packet::Destroy {
                username: f[0].to_string(),
                id: f[1].parse().ok()?,
            },
            PacketType::StartGame => Packet::StartGame {
                username: f[0].to_string(),
                mode: f[1].to_string(),
                map: f[2].to_string(),
                system_path: f[3].to_string(),
            },
            PacketType::Score => Packet::Score {
                username: f[0].to_string(),
                team: f[1].parse().ok()?,
                score: f[2].parse().ok()?,
            },
            PacketType::Level => Packet::Level {
                username: f[0].to_string(),
                path: f[1].to_string(),
                width: f[2].parse().ok()?,
                height: f[3].parse().ok()?,
            },
            PacketType::Invalid => return None,
        };
        Some(packet)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(tag) = self.packet_type().tag() else {
            return Ok(());
        };
        if !self.is_valid() {
            return Ok(());
        }
        write!(f, "{:02}", tag)?;

        match self {
            Packet::Login {
                username,
                id,
                x,
                y,
                team,
            } => write!(f, "{},{},{},{},{}", username, id, x, y, team),
            Packet::Disconnect { username } => write!(f, "{}", username),
            Packet::Move {
                username,
                x,
                y,
                moving,
                dir,
                has_flag,
            } => write!(
                f,
                "{},{},{},{},{},{}",
                username,
                x,
                y,
                flag(*moving),
                dir.to_wire(),
                flag(*has_flag)
            ),
            Packet::TestLogin {
                login_data,
                id,
                version,
                green,
                red,
            } => write!(f, "{},{},{},{},{}", login_data, id, version, green, red),
            Packet::Chat {
                username,
                color,
                message,
            } => write!(f, "{}#{}#{}", username, color, message),
            Packet::Damage { username, amount } => write!(f, "{},{}", username, amount),
            Packet::Bullet {
                username,
                id,
                x,
                y,
                dir,
                team,
            } => write!(
                f,
                "{},{},{},{},{},{}",
                username,
                id,
                x,
                y,
                dir.to_wire(),
                team
            ),
            Packet::Mine {
                username,
                id,
                x,
                y,
                team,
            } => write!(f, "{},{},{},{},{}", username, id, x, y, team),
            Packet::Destroy { username, id } => write!(f, "{},{}", username, id),
            Packet::StartGame {
                username,
                mode,
                map,
                system_path,
            } => write!(f, "{},{},{},{}", username, mode, map, system_path),
            Packet::Score {
                username,
                team,
                score,
            } => write!(f, "{},{},{}", username, team, score),
            Packet::Level {
                username,
                path,
                width,
                height,
            } => write!(f, "{},{},{},{}", username, path, width, height),
            Packet::Invalid { .. } => Ok(()),
        }
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn parse_flag(field: &str) -> Option<bool> {
    match field {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// Logs a datagram the way both ends do: movement chatter at trace, the rest at debug
pub fn log_datagram(direction: &str, addr: SocketAddr, data: &[u8]) {
    let text = String::from_utf8_lossy(data);
    let text = text.trim_end_matches('\0');
    let kind = text
        .get(0..2)
        .map(PacketType::lookup)
        .unwrap_or(PacketType::Invalid);

    if kind.is_high_frequency() {
        trace!("{} [{}] {}", direction, addr, text);
    } else {
        debug!("{} [{}] {}", direction, addr, text);
    }
}

/// True when the encoded packet fits into one receive buffer
pub fn fits_datagram(data: &[u8]) -> bool {
    data.len() <= PACKET_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(text: &str) -> Vec<u8> {
        let mut buffer = vec![0u8; PACKET_SIZE];
        buffer[..text.len()].copy_from_slice(text.as_bytes());
        buffer
    }

    #[test]
    fn test_lookup_known_tags() {
        assert_eq!(PacketType::lookup("00"), PacketType::Login);
        assert_eq!(PacketType::lookup("03"), PacketType::TestLogin);
        assert_eq!(PacketType::lookup("10"), PacketType::Destroy);
        assert_eq!(PacketType::lookup("13"), PacketType::Score);
        assert_eq!(PacketType::lookup("77"), PacketType::Level);
    }

    #[test]
    fn test_lookup_unknown_or_garbage_is_invalid() {
        assert_eq!(PacketType::lookup("08"), PacketType::Invalid);
        assert_eq!(PacketType::lookup("99"), PacketType::Invalid);
        assert_eq!(PacketType::lookup("ab"), PacketType::Invalid);
        assert_eq!(PacketType::lookup(""), PacketType::Invalid);
    }

    #[test]
    fn test_move_roundtrip() {
        let packet = Packet::Move {
            username: "Bob".to_string(),
            x: 150,
            y: 200,
            moving: true,
            dir: Direction::Right,
            has_flag: false,
        };

        let encoded = packet.encode();
        assert_eq!(encoded, b"02Bob,150,200,1,3,0".to_vec());
        assert_eq!(Packet::decode(&encoded), packet);
    }

    #[test]
    fn test_decode_trims_datagram_padding() {
        let decoded = Packet::decode(&padded("05Alice,-1"));
        assert_eq!(
            decoded,
            Packet::Damage {
                username: "Alice".to_string(),
                amount: -1,
            }
        );
    }

    #[test]
    fn test_chat_keeps_commas_in_message() {
        let packet = Packet::chat("Bob", 555, ": hello, world, again");
        let encoded = packet.encode();
        assert_eq!(encoded, b"04Bob#555#: hello, world, again".to_vec());
        assert_eq!(Packet::decode(&padded("04Bob#555#: hello, world, again")), packet);
    }

    #[test]
    fn test_chat_missing_color_is_invalid() {
        let decoded = Packet::decode(b"04Bob#: hello");
        assert!(!decoded.is_valid());
        assert_eq!(decoded.packet_type(), PacketType::Chat);
        assert_eq!(decoded.username(), None);
    }

    #[test]
    fn test_field_count_mismatch_is_invalid() {
        assert!(!Packet::decode(b"02Bob,1,2,0,3").is_valid());
        assert!(!Packet::decode(b"00Bob,1,2,3,GREEN,extra").is_valid());
        assert!(!Packet::decode(b"10Bob").is_valid());
    }

    #[test]
    fn test_unparseable_fields_are_invalid() {
        assert!(!Packet::decode(b"02Bob,x,2,0,3,0").is_valid());
        assert!(!Packet::decode(b"02Bob,1,2,2,3,0").is_valid());
        assert!(!Packet::decode(b"02Bob,1,2,0,4,0").is_valid());
        assert!(!Packet::decode(b"07Bob,1,2,3,BLUE").is_valid());
        assert!(!Packet::decode(b"77SERVER,/levels/a.png,-4,10").is_valid());
    }

    #[test]
    fn test_short_or_empty_datagrams_are_invalid() {
        assert_eq!(
            Packet::decode(b""),
            Packet::Invalid {
                kind: PacketType::Invalid
            }
        );
        assert!(!Packet::decode(b"0").is_valid());
        assert!(!Packet::decode(&[0u8; PACKET_SIZE]).is_valid());
    }

    #[test]
    fn test_disconnect_takes_whole_body() {
        let decoded = Packet::decode(b"01Some Name");
        assert_eq!(
            decoded,
            Packet::Disconnect {
                username: "Some Name".to_string()
            }
        );
        assert_eq!(decoded.encode(), b"01Some Name".to_vec());
    }

    #[test]
    fn test_id_bearing_packets() {
        let mut bullet = Packet::Bullet {
            username: "Bob".to_string(),
            id: -1,
            x: 10,
            y: 20,
            dir: Direction::Left,
            team: Team::Red,
        };
        assert_eq!(bullet.entity_id(), Some(-1));
        assert!(bullet.set_entity_id(42));
        assert_eq!(bullet.entity_id(), Some(42));
        assert_eq!(bullet.encode(), b"06Bob,42,10,20,2,RED".to_vec());

        let mut chat = Packet::chat("Bob", 0, "hi");
        assert!(!chat.set_entity_id(3));
        assert_eq!(chat.entity_id(), None);
    }

    #[test]
    fn test_every_kind_survives_encode_decode() {
        let packets = vec![
            Packet::Login {
                username: "Bob".to_string(),
                id: 3,
                x: 100,
                y: 100,
                team: Team::Green,
            },
            Packet::TestLogin {
                login_data: "!Server OK!".to_string(),
                id: 7,
                version: "v1.1.01".to_string(),
                green: -2,
                red: -2,
            },
            Packet::Mine {
                username: "Eve".to_string(),
                id: 12,
                x: 5,
                y: 6,
                team: Team::Red,
            },
            Packet::Destroy {
                username: "SERVER".to_string(),
                id: -2,
            },
            Packet::StartGame {
                username: "SERVER".to_string(),
                mode: "CTF".to_string(),
                map: "Arena".to_string(),
                system_path: "/levels/arena.png".to_string(),
            },
            Packet::Score {
                username: "Bob".to_string(),
                team: Team::Green,
                score: 4,
            },
            Packet::Level {
                username: "Bob".to_string(),
                path: "/levels/lobby.png".to_string(),
                width: 64,
                height: 48,
            },
        ];

        for packet in packets {
            let decoded = Packet::decode(&packet.encode());
            assert_eq!(decoded, packet, "mismatch for {:?}", packet.packet_type());
        }
    }

    #[test]
    fn test_invalid_encodes_to_nothing() {
        let invalid = Packet::Invalid {
            kind: PacketType::Chat,
        };
        assert!(invalid.encode().is_empty());
    }

    #[test]
    fn test_fits_datagram() {
        assert!(fits_datagram(&[b'a'; PACKET_SIZE]));
        assert!(!fits_datagram(&[b'a'; PACKET_SIZE + 1]));
    }
}
