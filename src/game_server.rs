use std::sync::Arc;

use crate::board::Color;
use crate::communication_protocol::{CommandType, JsonMsg, ServerMsg};
use crate::error::CommandError;
use crate::game::GameStatus;
use crate::moves::Move;
use crate::session_registry::{ConnectionId, Outbox, Role, Room, SessionRegistry};
use crate::storage::{AuthResolver, GameId, GameSession, StoreHandle};

/// Applies client commands to games. Commands on one game run one at a time under its room lock:
/// fetch, change, persist, then queue the broadcasts before the lock is released.
pub struct GameServer {
    registry: Arc<SessionRegistry>,
    store: StoreHandle,
    auth: Arc<dyn AuthResolver>,
}

impl GameServer {
    pub fn new(registry: Arc<SessionRegistry>, store: StoreHandle, auth: Arc<dyn AuthResolver>) -> Self {
        GameServer { registry, store, auth }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn open(&self, outbox: Outbox) -> ConnectionId {
        self.registry.open(outbox)
    }

    /// Entry point for a raw text frame. Failures are answered to `conn` alone.
    pub fn handle_text(&self, conn: ConnectionId, text: &str) {
        let result = serde_json::from_str::<JsonMsg>(text)
            .map_err(CommandError::from)
            .and_then(|msg| self.handle_command(conn, msg));
        if let Err(e) = result {
            log::warn!("Rejected command from {} ({:?}): {}", conn, e.kind(), e);
            self.registry.send(conn, ServerMsg::error(format!("Error: {}", e)));
        }
    }

    pub fn handle_command(&self, conn: ConnectionId, msg: JsonMsg) -> Result<(), CommandError> {
        log::debug!("{:?} from {} for game {}", msg.command_type, conn, msg.game_id);
        match msg.command_type {
            CommandType::Connect => self.connect(conn, &msg),
            CommandType::Observe => self.observe(conn, &msg),
            CommandType::MakeMove => {
                let m = msg.make_move.ok_or_else(|| CommandError::Protocol("MAKE_MOVE needs a move".to_string()))?;
                self.make_move(conn, &msg, m)
            }
            CommandType::Leave => self.leave(conn, &msg),
            CommandType::Resign => self.resign(conn, &msg),
        }
    }

    /// Transport-level close. Runs on its own; commands already in flight finish normally.
    pub fn disconnect(&self, conn: ConnectionId) {
        let Some(registration) = self.registry.close(conn) else {
            log::debug!("Connection {} closed without joining a game", conn);
            return;
        };
        let room = self.registry.room(registration.game_id);
        let _guard = room.lock();
        if registration.role == Role::Player {
            if let Err(e) = self.release_seat(conn, registration.game_id, &registration.username) {
                log::error!("Cannot release seat of {} in game {}: {}", registration.username, registration.game_id, e);
            }
        }
        log::info!("{} disconnected from game {}", registration.username, registration.game_id);
        self.registry.broadcast_all(registration.game_id, ServerMsg::notification(format!("{} disconnected", registration.username)));
    }

    fn connect(&self, conn: ConnectionId, msg: &JsonMsg) -> Result<(), CommandError> {
        let username = self.auth.resolve(&msg.auth_token)?;
        self.ensure_free_for(conn, msg.game_id)?;

        let room = self.room_of(msg.game_id)?;
        let _guard = room.lock();
        let mut session = self.store.fetch(msg.game_id)?;
        if let Some(color) = msg.player_color {
            if session.claim_seat(color, &username)? {
                self.store.update(session.clone())?;
            }
        }
        let seat = session.seat_of(&username);
        self.registry.register_player(conn, &username, msg.game_id)?;

        self.registry.send(conn, ServerMsg::load_game(&session.game, seat));
        let joined = match seat {
            Some(color) => format!("{} joined the game as {}", username, color),
            None => format!("{} joined the game", username),
        };
        log::info!("{} (connection {}) joined game {}", username, conn, msg.game_id);
        self.registry.broadcast(msg.game_id, ServerMsg::notification(joined), Some(conn));
        Ok(())
    }

    fn observe(&self, conn: ConnectionId, msg: &JsonMsg) -> Result<(), CommandError> {
        let username = self.auth.resolve(&msg.auth_token)?;
        self.ensure_free_for(conn, msg.game_id)?;

        let room = self.room_of(msg.game_id)?;
        let _guard = room.lock();
        let session = self.store.fetch(msg.game_id)?;
        self.registry.register_observer(conn, &username, msg.game_id)?;

        self.registry.send(conn, ServerMsg::load_game(&session.game, None));
        log::info!("{} (connection {}) observes game {}", username, conn, msg.game_id);
        self.registry.broadcast_all(msg.game_id, ServerMsg::notification(format!("{} is observing the game", username)));
        Ok(())
    }

    fn make_move(&self, conn: ConnectionId, msg: &JsonMsg, m: Move) -> Result<(), CommandError> {
        let username = self.auth.resolve(&msg.auth_token)?;
        self.ensure_player(conn, msg.game_id, &username)?;

        let room = self.room_of(msg.game_id)?;
        let _guard = room.lock();
        let mut session = self.store.fetch(msg.game_id)?;
        if session.over {
            return Err(CommandError::GameOver);
        }
        let seat = session.seat_of(&username)
            .ok_or_else(|| CommandError::Auth(format!("{} does not play in game {}", username, session.id)))?;
        if let Some(piece) = session.game.board().get(m.start) {
            if piece.color != seat {
                return Err(CommandError::Auth(format!("{} plays {}, the piece on {} is {}", username, seat, m.start, piece.color)));
            }
        }
        if session.game.turn() != seat {
            return Err(CommandError::Auth(format!("it is not {}'s turn", username)));
        }

        session.game.make_move(m)?;
        let status = session.game.status();
        session.over = status.is_over();
        self.store.update(session.clone())?;

        log::debug!("{} played {} in game {}", username, m, session.id);
        self.registry.broadcast_all(session.id, ServerMsg::load_game(&session.game, None));
        self.registry.broadcast_all_except(session.id, ServerMsg::notification(format!("{} made a move: {}", username, m)), conn);
        match status {
            GameStatus::InProgress => {
                let to_move = session.game.turn();
                if session.game.is_in_check(to_move) {
                    let notice = format!("{} is in check", player_name(&session, to_move));
                    self.registry.broadcast_all(session.id, ServerMsg::notification(notice));
                }
            }
            GameStatus::Checkmate { winner } => {
                let notice = format!("Checkmate! {} wins", player_name(&session, winner));
                log::info!("Game {} over: {}", session.id, notice);
                self.registry.broadcast_all(session.id, ServerMsg::notification(notice));
            }
            GameStatus::Stalemate => {
                log::info!("Game {} over: stalemate", session.id);
                self.registry.broadcast_all(session.id, ServerMsg::notification("Stalemate! The game is a draw"));
            }
        }
        Ok(())
    }

    fn resign(&self, conn: ConnectionId, msg: &JsonMsg) -> Result<(), CommandError> {
        let username = self.auth.resolve(&msg.auth_token)?;
        self.ensure_player(conn, msg.game_id, &username)?;

        let room = self.room_of(msg.game_id)?;
        let _guard = room.lock();
        let mut session = self.store.fetch(msg.game_id)?;
        let seat = session.seat_of(&username)
            .ok_or_else(|| CommandError::Auth(format!("{} does not play in game {}", username, session.id)))?;
        if session.over {
            return Err(CommandError::GameOver);
        }
        session.over = true;
        self.store.update(session.clone())?;

        let notice = format!("{} resigned, {} wins", username, player_name(&session, seat.opposite()));
        log::info!("Game {} over: {}", session.id, notice);
        self.registry.broadcast_all(session.id, ServerMsg::notification(notice));
        Ok(())
    }

    fn leave(&self, conn: ConnectionId, msg: &JsonMsg) -> Result<(), CommandError> {
        let username = self.auth.resolve(&msg.auth_token)?;
        let registration = self.registry.registration(conn)
            .filter(|r| r.game_id == msg.game_id && r.username == username)
            .ok_or_else(|| CommandError::Auth(format!("{} is not in game {}", username, msg.game_id)))?;

        let room = self.room_of(msg.game_id)?;
        let _guard = room.lock();
        if registration.role == Role::Player {
            self.release_seat(conn, msg.game_id, &username)?;
        }
        self.registry.unregister(conn);

        log::info!("{} (connection {}) left game {}", username, conn, msg.game_id);
        self.registry.broadcast_all(msg.game_id, ServerMsg::notification(format!("{} left the game", username)));
        Ok(())
    }

    // Caller holds the room lock. The seat stays taken while another player connection of the user remains.
    fn release_seat(&self, conn: ConnectionId, game_id: GameId, username: &str) -> Result<Option<Color>, CommandError> {
        if self.registry.has_other_player_connection(game_id, username, conn) {
            log::debug!("{} still plays game {} on another connection", username, game_id);
            return Ok(None);
        }
        let mut session = self.store.fetch(game_id)?;
        let released = session.clear_seat(username);
        if released.is_some() {
            self.store.update(session)?;
        }
        Ok(released)
    }

    // Rooms are only created for games the store knows about.
    fn room_of(&self, game_id: GameId) -> Result<Arc<Room>, CommandError> {
        if let Some(room) = self.registry.find_room(game_id) {
            return Ok(room);
        }
        self.store.fetch(game_id)?;
        Ok(self.registry.room(game_id))
    }

    fn ensure_player(&self, conn: ConnectionId, game_id: GameId, username: &str) -> Result<(), CommandError> {
        match self.registry.registration(conn) {
            Some(r) if r.game_id == game_id && r.username == username && r.role == Role::Player => Ok(()),
            _ => Err(CommandError::Auth(format!("{} has not joined game {} as a player on this connection", username, game_id))),
        }
    }

    fn ensure_free_for(&self, conn: ConnectionId, game_id: GameId) -> Result<(), CommandError> {
        match self.registry.registration(conn) {
            Some(current) if current.game_id != game_id =>
                Err(CommandError::Protocol(format!("this connection is already in game {}, leave it first", current.game_id))),
            _ => Ok(()),
        }
    }
}

fn player_name(session: &GameSession, color: Color) -> String {
    session.seat(color).map_or_else(|| color.to_string(), str::to_string)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{channel, Receiver};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::board::{Board, Color, Piece, PieceType, Position};
    use crate::communication_protocol::{CommandType, JsonMsg, ServerMsg};
    use crate::error::ErrorKind;
    use crate::game::Game;
    use crate::game_server::GameServer;
    use crate::moves::Move;
    use crate::session_registry::{ConnectionId, SessionRegistry};
    use crate::storage::{GameId, GameSession, GameStore, MemoryAuthStore, MemoryGameStore, StoreError, StoreHandle};

    struct FlakyStore {
        inner: MemoryGameStore,
        broken: Arc<AtomicBool>,
    }

    impl GameStore for FlakyStore {
        fn create(&self, name: &str) -> Result<GameId, StoreError> {
            self.inner.create(name)
        }
        fn fetch(&self, id: GameId) -> Result<GameSession, StoreError> {
            self.inner.fetch(id)
        }
        fn list(&self) -> Result<Vec<GameSession>, StoreError> {
            self.inner.list()
        }
        fn update(&self, session: GameSession) -> Result<(), StoreError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk on fire".to_string()));
            }
            self.inner.update(session)
        }
        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }
    }

    struct Client {
        conn: ConnectionId,
        token: String,
        inbox: Receiver<ServerMsg>,
    }

    impl Client {
        fn drain(&self) -> Vec<ServerMsg> {
            self.inbox.try_iter().collect()
        }
    }

    struct Harness {
        server: GameServer,
        auth: Arc<MemoryAuthStore>,
        store: StoreHandle,
        broken: Arc<AtomicBool>,
        game_id: GameId,
    }

    impl Harness {
        fn new() -> Self {
            let broken = Arc::new(AtomicBool::new(false));
            let store = StoreHandle::spawn(FlakyStore { inner: MemoryGameStore::new(), broken: broken.clone() }, Duration::from_secs(2));
            let game_id = store.create("test game").unwrap();
            let auth = Arc::new(MemoryAuthStore::new());
            let server = GameServer::new(Arc::new(SessionRegistry::new()), store.clone(), auth.clone());
            Harness { server, auth, store, broken, game_id }
        }

        fn client(&self, username: &str) -> Client {
            let (outbox, inbox) = channel();
            let conn = self.server.open(outbox);
            let token = self.auth.make_auth(username).unwrap();
            Client { conn, token, inbox }
        }

        fn send(&self, client: &Client, command_type: CommandType) {
            let msg = JsonMsg::new(command_type, &client.token, self.game_id);
            self.server.handle_text(client.conn, &serde_json::to_string(&msg).unwrap());
        }

        fn join(&self, client: &Client, color: Color) {
            let mut msg = JsonMsg::new(CommandType::Connect, &client.token, self.game_id);
            msg.player_color = Some(color);
            self.server.handle_command(client.conn, msg).unwrap();
        }

        fn play(&self, client: &Client, from: (u8, u8), to: (u8, u8)) -> Result<(), ErrorKind> {
            let mut msg = JsonMsg::new(CommandType::MakeMove, &client.token, self.game_id);
            msg.make_move = Some(Move::new(pos(from), pos(to)));
            self.server.handle_command(client.conn, msg).map_err(|e| e.kind())
        }

        fn stored(&self) -> GameSession {
            self.store.fetch(self.game_id).unwrap()
        }

        fn set_position(&self, game: Game) {
            let mut session = self.stored();
            session.game = game;
            self.store.update(session).unwrap();
        }

        /// White and black seated, one observer, inboxes emptied.
        fn seated(&self) -> (Client, Client, Client) {
            let white = self.client("alice");
            let black = self.client("bob");
            let watcher = self.client("carol");
            self.join(&white, Color::White);
            self.join(&black, Color::Black);
            self.send(&watcher, CommandType::Observe);
            for c in [&white, &black, &watcher] {
                c.drain();
            }
            (white, black, watcher)
        }
    }

    fn pos((row, col): (u8, u8)) -> Position {
        Position::new(row, col).unwrap()
    }

    fn loads(msgs: &[ServerMsg]) -> Vec<&Game> {
        msgs.iter()
            .filter_map(|m| match m {
                ServerMsg::LoadGame { game, .. } => Some(game),
                _ => None,
            })
            .collect()
    }

    fn texts(msgs: &[ServerMsg]) -> Vec<&str> {
        msgs.iter()
            .filter_map(|m| match m {
                ServerMsg::Notification { message } => Some(message.as_str()),
                ServerMsg::Error { error_message } => Some(error_message.as_str()),
                _ => None,
            })
            .collect()
    }

    fn is_error(msg: &ServerMsg) -> bool {
        matches!(msg, ServerMsg::Error { .. })
    }

    #[test]
    fn test_connect_sends_state_and_notifies() {
        let h = Harness::new();
        let white = h.client("alice");
        let black = h.client("bob");
        h.join(&white, Color::White);

        let msgs = white.drain();
        assert_eq!(msgs, vec![ServerMsg::load_game(&Game::new(), Some(Color::White))]);

        h.join(&black, Color::Black);
        assert_eq!(texts(&white.drain()), vec!["bob joined the game as BLACK"]);
        assert_eq!(loads(&black.drain()).len(), 1);

        let stored = h.stored();
        assert_eq!(stored.white_username.as_deref(), Some("alice"));
        assert_eq!(stored.black_username.as_deref(), Some("bob"));
    }

    #[test]
    fn test_taken_seat_is_rejected() {
        let h = Harness::new();
        let (_white, _black, _watcher) = h.seated();
        let intruder = h.client("mallory");
        let mut msg = JsonMsg::new(CommandType::Connect, &intruder.token, h.game_id);
        msg.player_color = Some(Color::White);
        let err = h.server.handle_command(intruder.conn, msg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(h.stored().white_username.as_deref(), Some("alice"));
        assert!(h.server.registry().registration(intruder.conn).is_none());
    }

    #[test]
    fn test_move_reaches_players_and_observers() {
        let h = Harness::new();
        let (white, black, watcher) = h.seated();

        assert_eq!(h.play(&white, (2, 5), (4, 5)), Ok(()));

        let white_msgs = white.drain();
        let black_msgs = black.drain();
        let watcher_msgs = watcher.drain();
        for msgs in [&white_msgs, &black_msgs, &watcher_msgs] {
            let games = loads(msgs);
            assert_eq!(games.len(), 1);
            assert_eq!(games[0].turn(), Color::Black);
            assert_eq!(games[0].board().get(pos((4, 5))), Some(Piece::new(Color::White, PieceType::Pawn)));
        }
        assert!(texts(&white_msgs).is_empty());
        assert_eq!(texts(&black_msgs), vec!["alice made a move: e2 -> e4"]);
        assert_eq!(texts(&watcher_msgs), vec!["alice made a move: e2 -> e4"]);
        assert_eq!(h.stored().game.turn(), Color::Black);
    }

    #[test]
    fn test_move_without_seat_is_rejected() {
        let h = Harness::new();
        let (white, black, watcher) = h.seated();
        let stranger = h.client("dave");
        h.send(&stranger, CommandType::Connect);
        for c in [&white, &black, &watcher] {
            c.drain();
        }
        stranger.drain();

        assert_eq!(h.play(&stranger, (2, 5), (4, 5)), Err(ErrorKind::Auth));
        assert_eq!(h.play(&watcher, (2, 5), (4, 5)), Err(ErrorKind::Auth));

        let mut msg = JsonMsg::new(CommandType::MakeMove, &stranger.token, h.game_id);
        msg.make_move = Some(Move::new(pos((2, 5)), pos((4, 5))));
        h.server.handle_text(stranger.conn, &serde_json::to_string(&msg).unwrap());
        let msgs = stranger.drain();
        assert_eq!(msgs.len(), 1);
        assert!(is_error(&msgs[0]));

        for c in [&white, &black, &watcher] {
            assert!(c.drain().is_empty());
        }
        assert_eq!(h.stored().game, Game::new());
    }

    #[test]
    fn test_commands_need_a_joined_connection() {
        let h = Harness::new();
        let (white, black, watcher) = h.seated();

        // Same user, but this connection never joined.
        let unjoined = h.client("alice");
        assert_eq!(h.play(&unjoined, (2, 5), (4, 5)), Err(ErrorKind::Auth));
        let resign = JsonMsg::new(CommandType::Resign, &unjoined.token, h.game_id);
        assert_eq!(h.server.handle_command(unjoined.conn, resign).unwrap_err().kind(), ErrorKind::Auth);

        // Same user, but this connection is bound to another game.
        let other = h.store.create("other game").unwrap();
        let elsewhere = h.client("bob");
        let observe = JsonMsg::new(CommandType::Observe, &elsewhere.token, other);
        h.server.handle_command(elsewhere.conn, observe).unwrap();
        let resign = JsonMsg::new(CommandType::Resign, &elsewhere.token, h.game_id);
        assert_eq!(h.server.handle_command(elsewhere.conn, resign).unwrap_err().kind(), ErrorKind::Auth);

        // Another user's token on a joined connection.
        let mut msg = JsonMsg::new(CommandType::MakeMove, &black.token, h.game_id);
        msg.make_move = Some(Move::new(pos((7, 5)), pos((5, 5))));
        assert_eq!(h.server.handle_command(white.conn, msg).unwrap_err().kind(), ErrorKind::Auth);

        let stored = h.stored();
        assert!(!stored.over);
        assert_eq!(stored.game, Game::new());
        for c in [&white, &black, &watcher] {
            assert!(c.drain().is_empty());
        }
    }

    #[test]
    fn test_unknown_game_leaves_no_room() {
        let h = Harness::new();
        let client = h.client("alice");
        for id in 1000..1010 {
            for command_type in [CommandType::Connect, CommandType::Observe, CommandType::MakeMove, CommandType::Resign, CommandType::Leave] {
                let mut msg = JsonMsg::new(command_type, &client.token, GameId(id));
                msg.make_move = Some(Move::new(pos((2, 5)), pos((4, 5))));
                assert!(h.server.handle_command(client.conn, msg).is_err());
            }
            assert!(h.server.registry().find_room(GameId(id)).is_none());
        }
        assert!(h.server.registry().registration(client.conn).is_none());
    }

    #[test]
    fn test_turn_and_piece_ownership() {
        let h = Harness::new();
        let (white, black, _watcher) = h.seated();

        assert_eq!(h.play(&black, (7, 5), (5, 5)), Err(ErrorKind::Auth));
        assert_eq!(h.play(&black, (2, 5), (4, 5)), Err(ErrorKind::Auth));
        assert_eq!(h.play(&white, (7, 5), (5, 5)), Err(ErrorKind::Auth));
        assert_eq!(h.play(&white, (2, 5), (5, 5)), Err(ErrorKind::RuleViolation));
        assert_eq!(h.play(&white, (4, 4), (5, 4)), Err(ErrorKind::RuleViolation));
        assert_eq!(h.stored().game, Game::new());
    }

    #[test]
    fn test_resign_ends_game() {
        let h = Harness::new();
        let (white, black, watcher) = h.seated();

        h.send(&black, CommandType::Resign);
        for c in [&white, &black, &watcher] {
            assert_eq!(texts(&c.drain()), vec!["bob resigned, alice wins"]);
        }
        let stored = h.stored();
        assert!(stored.over);
        assert_eq!(stored.game, Game::new());

        assert_eq!(h.play(&white, (2, 5), (4, 5)), Err(ErrorKind::RuleViolation));
        assert_eq!(h.play(&black, (7, 5), (5, 5)), Err(ErrorKind::RuleViolation));
        let again = JsonMsg::new(CommandType::Resign, &white.token, h.game_id);
        assert_eq!(h.server.handle_command(white.conn, again).unwrap_err().kind(), ErrorKind::RuleViolation);
        assert!(h.stored().over);
    }

    #[test]
    fn test_observer_cannot_resign() {
        let h = Harness::new();
        let (_white, _black, watcher) = h.seated();
        let msg = JsonMsg::new(CommandType::Resign, &watcher.token, h.game_id);
        assert_eq!(h.server.handle_command(watcher.conn, msg).unwrap_err().kind(), ErrorKind::Auth);
        assert!(!h.stored().over);
    }

    #[test]
    fn test_disconnect_frees_seat() {
        let h = Harness::new();
        let (white, black, watcher) = h.seated();

        h.server.disconnect(black.conn);

        assert_eq!(texts(&white.drain()), vec!["bob disconnected"]);
        assert_eq!(texts(&watcher.drain()), vec!["bob disconnected"]);
        assert!(black.inbox.recv().is_err());
        let stored = h.stored();
        assert_eq!(stored.black_username, None);
        assert_eq!(stored.white_username.as_deref(), Some("alice"));
        assert!(h.server.registry().observers(h.game_id).contains(&watcher.conn));
        assert!(!h.server.registry().players(h.game_id).contains(&black.conn));
    }

    #[test]
    fn test_seat_kept_while_another_connection_plays() {
        let h = Harness::new();
        let (white, black, _watcher) = h.seated();

        let second_tab = h.client("alice");
        h.send(&second_tab, CommandType::Connect);
        h.server.disconnect(second_tab.conn);
        assert_eq!(h.stored().white_username.as_deref(), Some("alice"));

        let third_tab = h.client("alice");
        h.send(&third_tab, CommandType::Connect);
        h.send(&third_tab, CommandType::Leave);
        assert_eq!(h.stored().white_username.as_deref(), Some("alice"));
        assert_eq!(h.play(&white, (2, 5), (4, 5)), Ok(()));

        h.server.disconnect(white.conn);
        assert_eq!(h.stored().white_username, None);
        assert_eq!(h.stored().black_username.as_deref(), Some("bob"));
        assert!(texts(&black.drain()).contains(&"alice disconnected"));
    }

    #[test]
    fn test_observer_disconnect_keeps_seats() {
        let h = Harness::new();
        let (white, _black, watcher) = h.seated();
        h.server.disconnect(watcher.conn);
        assert_eq!(texts(&white.drain()), vec!["carol disconnected"]);
        let stored = h.stored();
        assert!(stored.white_username.is_some() && stored.black_username.is_some());
    }

    #[test]
    fn test_leave() {
        let h = Harness::new();
        let (white, black, watcher) = h.seated();

        h.send(&white, CommandType::Leave);
        assert!(white.drain().is_empty());
        assert_eq!(texts(&black.drain()), vec!["alice left the game"]);
        assert_eq!(texts(&watcher.drain()), vec!["alice left the game"]);
        assert_eq!(h.stored().white_username, None);
        assert!(h.server.registry().registration(white.conn).is_none());

        let msg = JsonMsg::new(CommandType::Leave, &white.token, h.game_id);
        assert_eq!(h.server.handle_command(white.conn, msg).unwrap_err().kind(), ErrorKind::Auth);

        // The freed seat can be taken again, and the connection may join again.
        let newcomer = h.client("erin");
        h.join(&newcomer, Color::White);
        assert_eq!(h.stored().white_username.as_deref(), Some("erin"));
        h.send(&white, CommandType::Observe);
        assert_eq!(loads(&white.drain()).len(), 1);
    }

    #[test]
    fn test_checkmate_ends_game() {
        let h = Harness::new();
        let (white, black, watcher) = h.seated();

        h.play(&white, (2, 6), (3, 6)).unwrap();
        h.play(&black, (7, 5), (5, 5)).unwrap();
        h.play(&white, (2, 7), (4, 7)).unwrap();
        for c in [&white, &black, &watcher] {
            c.drain();
        }
        h.play(&black, (8, 4), (4, 8)).unwrap();

        assert!(texts(&white.drain()).contains(&"Checkmate! bob wins"));
        assert!(texts(&watcher.drain()).contains(&"Checkmate! bob wins"));
        assert!(h.stored().over);
        assert_eq!(h.play(&white, (2, 1), (3, 1)), Err(ErrorKind::RuleViolation));
    }

    #[test]
    fn test_stalemate_ends_game() {
        let h = Harness::new();
        let (white, black, watcher) = h.seated();
        let mut board = Board::empty();
        board.set(pos((8, 8)), Some(Piece::new(Color::Black, PieceType::King)));
        board.set(pos((7, 6)), Some(Piece::new(Color::White, PieceType::King)));
        board.set(pos((5, 7)), Some(Piece::new(Color::White, PieceType::Queen)));
        h.set_position(Game::from_board(board, Color::White));

        assert_eq!(h.play(&white, (5, 7), (6, 7)), Ok(()));

        let notice = "Stalemate! The game is a draw";
        assert!(texts(&white.drain()).contains(&notice));
        assert!(texts(&black.drain()).contains(&notice));
        assert!(texts(&watcher.drain()).contains(&notice));
        let stored = h.stored();
        assert!(stored.over);
        assert_eq!(stored.game.board().get(pos((6, 7))), Some(Piece::new(Color::White, PieceType::Queen)));
        assert_eq!(h.play(&black, (8, 8), (8, 7)), Err(ErrorKind::RuleViolation));
    }

    #[test]
    fn test_failed_save_changes_nothing() {
        let h = Harness::new();
        let (white, black, watcher) = h.seated();

        h.broken.store(true, Ordering::SeqCst);
        assert_eq!(h.play(&white, (2, 5), (4, 5)), Err(ErrorKind::Persistence));
        for c in [&white, &black, &watcher] {
            assert!(c.drain().is_empty());
        }
        assert_eq!(h.stored().game, Game::new());

        h.broken.store(false, Ordering::SeqCst);
        assert_eq!(h.play(&white, (2, 5), (4, 5)), Ok(()));
        assert_eq!(h.stored().game.turn(), Color::Black);
    }

    #[test]
    fn test_bad_input_gets_error_reply() {
        let h = Harness::new();
        let client = h.client("alice");

        h.server.handle_text(client.conn, "{\"commandType\": \"DANCE\"}");
        h.server.handle_text(client.conn, "not json at all");
        let no_move = JsonMsg::new(CommandType::MakeMove, &client.token, h.game_id);
        assert_eq!(h.server.handle_command(client.conn, no_move).unwrap_err().kind(), ErrorKind::Protocol);

        let bad_token = JsonMsg::new(CommandType::Connect, "forged", h.game_id);
        assert_eq!(h.server.handle_command(client.conn, bad_token).unwrap_err().kind(), ErrorKind::Auth);

        let missing = JsonMsg::new(CommandType::Observe, &client.token, GameId(404));
        assert_eq!(h.server.handle_command(client.conn, missing).unwrap_err().kind(), ErrorKind::NotFound);

        let msgs = client.drain();
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(is_error));
        assert!(h.server.registry().registration(client.conn).is_none());
    }

    #[test]
    fn test_one_game_per_connection() {
        let h = Harness::new();
        let client = h.client("alice");
        h.join(&client, Color::White);
        let other = h.store.create("other game").unwrap();
        let msg = JsonMsg::new(CommandType::Observe, &client.token, other);
        assert_eq!(h.server.handle_command(client.conn, msg).unwrap_err().kind(), ErrorKind::Protocol);
        assert_eq!(h.server.registry().registration(client.conn).map(|r| r.game_id), Some(h.game_id));
    }
}
