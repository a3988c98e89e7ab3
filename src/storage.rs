//! Records and the collaborators that keep them: credential lookup and game storage.
//!
//! The coordinator never talks to a [`GameStore`] directly. It goes through a [`StoreHandle`],
//! which runs the store on its own thread and gives every call a deadline.

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError, RwLock};
use std::thread::spawn;
use std::time::{Duration, Instant};

use crate::board::Color;
use crate::game::Game;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct GameId(pub u32);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeatError {
    #[error("the {0} seat is already taken")]
    Taken(Color),

    #[error("{username} already plays {color} in this game")]
    AlreadySeated { username: String, color: Color },
}

/// A stored game: its seats, the live board and whether it has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSession {
    pub id: GameId,
    pub name: String,
    pub white_username: Option<String>,
    pub black_username: Option<String>,
    pub game: Game,
    pub over: bool,
}

impl GameSession {
    pub fn new(id: GameId, name: String) -> Self {
        GameSession { id, name, white_username: None, black_username: None, game: Game::new(), over: false }
    }

    pub fn seat(&self, color: Color) -> Option<&str> {
        match color {
            Color::White => self.white_username.as_deref(),
            Color::Black => self.black_username.as_deref(),
        }
    }

    pub fn seat_of(&self, username: &str) -> Option<Color> {
        [Color::White, Color::Black].into_iter().find(|&c| self.seat(c) == Some(username))
    }

    /// Returns `Ok(false)` when the user already sits there.
    pub fn claim_seat(&mut self, color: Color, username: &str) -> Result<bool, SeatError> {
        if let Some(holder) = self.seat(color) {
            return if holder == username { Ok(false) } else { Err(SeatError::Taken(color)) };
        }
        if let Some(held) = self.seat_of(username) {
            return Err(SeatError::AlreadySeated { username: username.to_string(), color: held });
        }
        *self.seat_slot(color) = Some(username.to_string());
        Ok(true)
    }

    pub fn clear_seat(&mut self, username: &str) -> Option<Color> {
        let color = self.seat_of(username)?;
        *self.seat_slot(color) = None;
        Some(color)
    }

    fn seat_slot(&mut self, color: Color) -> &mut Option<String> {
        match color {
            Color::White => &mut self.white_username,
            Color::Black => &mut self.black_username,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unknown or expired auth token")]
    Unauthorized,

    #[error("username cannot be empty")]
    EmptyUsername,
}

pub trait AuthResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Result<String, AuthError>;
}

/// Token → username table, tokens are random 128-bit hex strings.
#[derive(Debug, Default)]
pub struct MemoryAuthStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_auth(&self, username: &str) -> Result<String, AuthError> {
        if username.trim().is_empty() {
            return Err(AuthError::EmptyUsername);
        }
        let token = format!("{:032x}", rand::random::<u128>());
        self.tokens.write().unwrap_or_else(PoisonError::into_inner).insert(token.clone(), username.to_string());
        Ok(token)
    }
}

impl AuthResolver for MemoryAuthStore {
    fn resolve(&self, token: &str) -> Result<String, AuthError> {
        self.tokens.read().unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
            .ok_or(AuthError::Unauthorized)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("game {0} not found")]
    NotFound(GameId),

    #[error("game name cannot be empty")]
    InvalidName,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage did not answer in time")]
    Timeout,
}

pub trait GameStore {
    fn create(&self, name: &str) -> Result<GameId, StoreError>;
    fn fetch(&self, id: GameId) -> Result<GameSession, StoreError>;
    fn list(&self) -> Result<Vec<GameSession>, StoreError>;
    fn update(&self, session: GameSession) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryGames {
    games: HashMap<GameId, GameSession>,
    next_id: u32,
}

/// Games kept in a map, ids handed out from 1.
#[derive(Debug, Default)]
pub struct MemoryGameStore {
    inner: Mutex<MemoryGames>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GameStore for MemoryGameStore {
    fn create(&self, name: &str) -> Result<GameId, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidName);
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = GameId(inner.next_id);
        inner.games.insert(id, GameSession::new(id, name.to_string()));
        Ok(id)
    }

    fn fetch(&self, id: GameId) -> Result<GameSession, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.games.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn list(&self) -> Result<Vec<GameSession>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut games: Vec<GameSession> = inner.games.values().cloned().collect();
        games.sort_by_key(|g| g.id);
        Ok(games)
    }

    fn update(&self, session: GameSession) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.games.get_mut(&session.id) {
            None => Err(StoreError::NotFound(session.id)),
            Some(stored) => {
                *stored = session;
                Ok(())
            }
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.games.clear();
        inner.next_id = 0;
        Ok(())
    }
}

type Reply<T> = Sender<Result<T, StoreError>>;

enum StoreMsg {
    Create(String, Reply<GameId>),
    Fetch(GameId, Reply<GameSession>),
    Update(GameSession, Reply<()>),
}

struct Envelope {
    deadline: Instant,
    msg: StoreMsg,
}

/// Cloneable front for a store running on its own thread. Every call waits at most `timeout`.
#[derive(Clone)]
pub struct StoreHandle {
    sender: Sender<Envelope>,
    timeout: Duration,
}

impl StoreHandle {
    pub fn spawn<S>(store: S, timeout: Duration) -> StoreHandle
    where
        S: GameStore + Send + 'static,
    {
        let (sender, receiver) = channel();
        spawn(move || serve(store, receiver));
        StoreHandle { sender, timeout }
    }

    pub fn create(&self, name: &str) -> Result<GameId, StoreError> {
        let name = name.to_string();
        self.call(|reply| StoreMsg::Create(name, reply))
    }

    pub fn fetch(&self, id: GameId) -> Result<GameSession, StoreError> {
        self.call(|reply| StoreMsg::Fetch(id, reply))
    }

    pub fn update(&self, session: GameSession) -> Result<(), StoreError> {
        self.call(|reply| StoreMsg::Update(session, reply))
    }

    fn call<T>(&self, msg: impl FnOnce(Reply<T>) -> StoreMsg) -> Result<T, StoreError> {
        let (reply, answer) = channel();
        let envelope = Envelope { deadline: Instant::now() + self.timeout, msg: msg(reply) };
        self.sender.send(envelope)
            .map_err(|_| StoreError::Unavailable("store thread has stopped".to_string()))?;
        match answer.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(StoreError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Unavailable("store dropped the request".to_string())),
        }
    }
}

fn serve<S: GameStore>(store: S, receiver: Receiver<Envelope>) {
    for Envelope { deadline, msg } in receiver {
        // The caller has already given up; running it now would apply a change nobody saw succeed.
        if Instant::now() >= deadline {
            log::warn!("Dropping expired store request");
            continue;
        }
        // A failed send means the caller timed out while the store was working.
        let delivered = match msg {
            StoreMsg::Create(name, reply) => reply.send(store.create(&name)).is_ok(),
            StoreMsg::Fetch(id, reply) => reply.send(store.fetch(id)).is_ok(),
            StoreMsg::Update(session, reply) => reply.send(store.update(session)).is_ok(),
        };
        if !delivered {
            log::warn!("Store answered after the caller stopped waiting");
        }
    }
    log::debug!("Store thread shutting down");
}
