//! Client side of the TESTLOGIN / LOGIN exchange
//!
//! ```text
//! Idle --begin--> QueryingTeams --counts--> ChoosingTeam --choose_team-->
//! AwaitingApproval --"!Server OK!"--> Approved --login--> LoggedIn
//! ```
//!
//! Any refusal while waiting moves to `Rejected` and is surfaced as
//! [`NetError::LoginRejected`]; the client never retries on its own.

use log::{debug, info, warn};
use shared::{prepare_username, LoginReply, LoginRequest, NetError, Packet, Result, Team};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    QueryingTeams,
    ChoosingTeam { green: i32, red: i32 },
    AwaitingApproval { team: Team },
    Approved { id: i32, team: Team },
    LoggedIn { id: i32, team: Team },
    Rejected(LoginReply),
}

#[derive(Debug, Clone)]
pub struct Handshake {
    username: String,
    version: String,
    state: LoginState,
}

impl Handshake {
    /// Cleans and checks the name before anything is sent
    pub fn new(raw_username: &str, version: &str) -> Result<Self> {
        Ok(Self {
            username: prepare_username(raw_username)?,
            version: version.to_string(),
            state: LoginState::Idle,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self.state, LoginState::LoggedIn { .. })
    }

    pub fn team(&self) -> Option<Team> {
        match self.state {
            LoginState::AwaitingApproval { team }
            | LoginState::Approved { team, .. }
            | LoginState::LoggedIn { team, .. } => Some(team),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<i32> {
        match self.state {
            LoginState::Approved { id, .. } | LoginState::LoggedIn { id, .. } => Some(id),
            _ => None,
        }
    }

    /// The smaller team, green on a tie; `None` before the counts arrive
    pub fn suggested_team(&self) -> Option<Team> {
        match self.state {
            LoginState::ChoosingTeam { green, red } if red < green => Some(Team::Red),
            LoginState::ChoosingTeam { .. } => Some(Team::Green),
            _ => None,
        }
    }

    /// Asks for the team counts
    pub fn begin(&mut self) -> Packet {
        self.state = LoginState::QueryingTeams;
        LoginRequest::TeamQuery.to_packet(&self.username, &self.version)
    }

    /// Registers for `team`; only valid once the counts are known
    pub fn choose_team(&mut self, team: Team) -> Result<Packet> {
        match self.state {
            LoginState::ChoosingTeam { .. } | LoginState::AwaitingApproval { .. } => {
                self.state = LoginState::AwaitingApproval { team };
                Ok(LoginRequest::Register { team }.to_packet(&self.username, &self.version))
            }
            ref other => Err(NetError::Handshake(format!(
                "cannot choose a team while {:?}",
                other
            ))),
        }
    }

    /// The packet that resends whatever request is still unanswered
    pub fn pending_request(&self) -> Option<Packet> {
        match self.state {
            LoginState::QueryingTeams => {
                Some(LoginRequest::TeamQuery.to_packet(&self.username, &self.version))
            }
            LoginState::AwaitingApproval { team } => {
                Some(LoginRequest::Register { team }.to_packet(&self.username, &self.version))
            }
            _ => None,
        }
    }

    pub fn on_reply(&mut self, reply: LoginReply) -> Result<()> {
        match (self.state.clone(), reply) {
            (LoginState::QueryingTeams, LoginReply::TeamCounts { green, red }) => {
                debug!("Teams: {} green, {} red", green, red);
                self.state = LoginState::ChoosingTeam { green, red };
                Ok(())
            }
            (LoginState::AwaitingApproval { team }, LoginReply::Accepted { id }) => {
                info!("Server accepted {} with id {}", self.username, id);
                self.state = LoginState::Approved { id, team };
                Ok(())
            }
            (LoginState::QueryingTeams | LoginState::AwaitingApproval { .. }, reply)
                if reply.is_rejection() =>
            {
                warn!("Login refused: {}", reply);
                self.state = LoginState::Rejected(reply.clone());
                Err(NetError::LoginRejected(reply))
            }
            (state, reply) => {
                debug!("Ignoring login reply {:?} while {:?}", reply, state);
                Ok(())
            }
        }
    }

    /// Builds the LOGIN that turns the approval into a session
    pub fn login(&mut self, x: i32, y: i32) -> Result<Packet> {
        let LoginState::Approved { id, team } = self.state else {
            return Err(NetError::Handshake(format!(
                "cannot log in while {:?}",
                self.state
            )));
        };
        self.state = LoginState::LoggedIn { id, team };
        Ok(Packet::Login {
            username: self.username.clone(),
            id,
            x,
            y,
            team,
        })
    }
}
