//! Who is connected, under which name, and to which game.
//!
//! Lock order is always `connections` before a room's `members`; the room's command lock is taken
//! by the coordinator before either of them and never while holding them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::communication_protocol::ServerMsg;
use crate::storage::GameId;

pub type ConnectionId = u32;
pub type Outbox = Sender<ServerMsg>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Player,
    Observer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub game_id: GameId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is not open")]
    UnknownConnection(ConnectionId),

    #[error("this connection is already in game {0}, leave it first")]
    AlreadyInGame(GameId),
}

struct Connection {
    outbox: Outbox,
    registration: Option<Registration>,
}

#[derive(Debug, Default)]
struct Members {
    players: HashSet<ConnectionId>,
    observers: HashSet<ConnectionId>,
}

impl Members {
    fn remove(&mut self, conn: ConnectionId) {
        self.players.remove(&conn);
        self.observers.remove(&conn);
    }
}

/// Per-game entry. `lock` serializes commands on the game; `members` only guards the sets.
#[derive(Debug, Default)]
pub struct Room {
    lock: Mutex<()>,
    members: Mutex<Members>,
}

impl Room {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn members(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn players(&self) -> HashSet<ConnectionId> {
        self.members().players.clone()
    }

    fn observers(&self) -> HashSet<ConnectionId> {
        self.members().observers.clone()
    }
}

pub struct SessionRegistry {
    next_id: AtomicU32,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    // Rooms are never dropped, so two commands on one game always share the same lock.
    // Only create them for games the store has confirmed.
    rooms: Mutex<HashMap<GameId, Arc<Room>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            next_id: AtomicU32::new(1),
            connections: RwLock::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a freshly accepted connection. It belongs to no game until it registers.
    pub fn open(&self, outbox: Outbox) -> ConnectionId {
        let conn = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
            .insert(conn, Connection { outbox, registration: None });
        log::debug!("Connection {} opened", conn);
        conn
    }

    /// The room of `game_id`, created on first use.
    pub fn room(&self, game_id: GameId) -> Arc<Room> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
            .entry(game_id)
            .or_default()
            .clone()
    }

    pub fn find_room(&self, game_id: GameId) -> Option<Arc<Room>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner).get(&game_id).cloned()
    }

    pub fn register_player(&self, conn: ConnectionId, username: &str, game_id: GameId) -> Result<(), RegistryError> {
        self.register(conn, username, game_id, Role::Player)
    }

    pub fn register_observer(&self, conn: ConnectionId, username: &str, game_id: GameId) -> Result<(), RegistryError> {
        self.register(conn, username, game_id, Role::Observer)
    }

    fn register(&self, conn: ConnectionId, username: &str, game_id: GameId, role: Role) -> Result<(), RegistryError> {
        let room = self.room(game_id);
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        let connection = connections.get_mut(&conn).ok_or(RegistryError::UnknownConnection(conn))?;
        if let Some(current) = &connection.registration {
            if current.game_id != game_id {
                return Err(RegistryError::AlreadyInGame(current.game_id));
            }
        }
        connection.registration = Some(Registration { username: username.to_string(), game_id, role });

        let mut members = room.members();
        members.remove(conn);
        match role {
            Role::Player => members.players.insert(conn),
            Role::Observer => members.observers.insert(conn),
        };
        log::debug!("Connection {} registered as {:?} of game {} for {}", conn, role, game_id, username);
        Ok(())
    }

    /// Detach the connection from its game. The connection itself stays open.
    pub fn unregister(&self, conn: ConnectionId) -> Option<Registration> {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        let registration = connections.get_mut(&conn)?.registration.take()?;
        if let Some(room) = self.find_room(registration.game_id) {
            room.members().remove(conn);
        }
        Some(registration)
    }

    /// Unregister and forget the connection; dropping its outbox ends its writer.
    pub fn close(&self, conn: ConnectionId) -> Option<Registration> {
        let registration = self.unregister(conn);
        self.connections.write().unwrap_or_else(PoisonError::into_inner).remove(&conn);
        log::debug!("Connection {} closed", conn);
        registration
    }

    pub fn registration(&self, conn: ConnectionId) -> Option<Registration> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
            .get(&conn)
            .and_then(|c| c.registration.clone())
    }

    pub fn players(&self, game_id: GameId) -> HashSet<ConnectionId> {
        self.find_room(game_id).map(|room| room.players()).unwrap_or_default()
    }

    pub fn observers(&self, game_id: GameId) -> HashSet<ConnectionId> {
        self.find_room(game_id).map(|room| room.observers()).unwrap_or_default()
    }

    /// Whether `username` is still a player of the game through a connection other than `excluding`.
    pub fn has_other_player_connection(&self, game_id: GameId, username: &str, excluding: ConnectionId) -> bool {
        let players = self.players(game_id);
        let connections = self.connections.read().unwrap_or_else(PoisonError::into_inner);
        players.iter()
            .filter(|&&c| c != excluding)
            .filter_map(|c| connections.get(c)?.registration.as_ref())
            .any(|r| r.username == username)
    }

    pub fn send(&self, conn: ConnectionId, msg: ServerMsg) {
        self.deliver(&[conn], msg);
    }

    /// Players of the game only.
    pub fn broadcast(&self, game_id: GameId, msg: ServerMsg, excluding: Option<ConnectionId>) {
        let targets: Vec<ConnectionId> = self.players(game_id).into_iter()
            .filter(|&c| Some(c) != excluding)
            .collect();
        self.deliver(&targets, msg);
    }

    pub fn broadcast_all(&self, game_id: GameId, msg: ServerMsg) {
        self.broadcast_everyone(game_id, msg, None);
    }

    pub fn broadcast_all_except(&self, game_id: GameId, msg: ServerMsg, excluding: ConnectionId) {
        self.broadcast_everyone(game_id, msg, Some(excluding));
    }

    fn broadcast_everyone(&self, game_id: GameId, msg: ServerMsg, excluding: Option<ConnectionId>) {
        let Some(room) = self.find_room(game_id) else {
            return;
        };
        let targets: Vec<ConnectionId> = {
            let members = room.members();
            members.players.iter().chain(members.observers.iter())
                .copied()
                .filter(|&c| Some(c) != excluding)
                .collect()
        };
        self.deliver(&targets, msg);
    }

    // Only queues; the socket write happens on the connection's writer thread.
    fn deliver(&self, targets: &[ConnectionId], msg: ServerMsg) {
        let connections = self.connections.read().unwrap_or_else(PoisonError::into_inner);
        for conn in targets {
            match connections.get(conn) {
                None => log::debug!("Connection {} is gone, message dropped", conn),
                Some(connection) => {
                    if connection.outbox.send(msg.clone()).is_err() {
                        log::debug!("Writer of connection {} has stopped", conn);
                    }
                }
            }
        }
    }
}
