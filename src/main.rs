use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::spawn;

use tungstenite::{accept, Message, WebSocket};
use tungstenite::protocol::Role;

use chess_multiplayer::communication_protocol::ServerMsg;
use chess_multiplayer::config::Config;
use chess_multiplayer::game_server::GameServer;
use chess_multiplayer::session_registry::{ConnectionId, SessionRegistry};
use chess_multiplayer::storage::{MemoryAuthStore, MemoryGameStore, StoreHandle};

fn try_send(ws: &mut WebSocket<TcpStream>, msg: String) -> bool {
    match ws.send(Message::Text(msg)) {
        Ok(_) => {
            log::debug!("Msg sent");
            true
        }
        Err(e) => {
            log::error!("Cannot send message, error: {}", e);
            false
        }
    }
}

fn write_messages(mut websocket: WebSocket<TcpStream>, inbox: Receiver<ServerMsg>, client_id: ConnectionId) {
    for msg in inbox {
        let text = match serde_json::to_string(&msg) {
            Ok(t) => t,
            Err(e) => {
                log::error!("Cannot serialize message for {}: {}", client_id, e);
                continue
            }
        };
        if !try_send(&mut websocket, text) {
            break;
        }
    }
    log::debug!("Writer of client {} finished", client_id);
}

fn handle_client(server: Arc<GameServer>, tcp_stream: TcpStream) {
    let tcp_stream_clone = match tcp_stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::error!("Cannot clone tcp stream: {}", e);
            return
        }
    };
    let mut websocket = match accept(tcp_stream) {
        Ok(w) => w,
        Err(e) => {
            log::error!("Cannot create websocket: {}", e);
            return
        }
    };
    let ws_writer = WebSocket::from_raw_socket(tcp_stream_clone, Role::Server, Some(websocket.get_config().clone()));

    let (outbox, inbox) = channel();
    let client_id = server.open(outbox);
    spawn(move || write_messages(ws_writer, inbox, client_id));
    log::info!("New client {}", client_id);

    loop {
        let msg = match websocket.read() {
            Ok(m) => m,
            Err(e) => {
                log::info!("Cannot read websocket of {}, error: {}", client_id, e);
                break;
            }
        };

        match msg {
            Message::Text(m) => {
                log::debug!("{} - Received: {}", client_id, m);
                server.handle_text(client_id, &m);
            }
            Message::Binary(_) => { log::debug!("binary msg"); }
            Message::Ping(_) => { log::debug!("ping msg"); }
            Message::Pong(_) => { log::debug!("pong msg"); }
            Message::Close(_) => {
                log::debug!("Closing websocket");
                break;
            }
            Message::Frame(_) => { log::debug!("frame msg"); }
        };
    }

    server.disconnect(client_id);
    log::info!("Client {} disconnected", client_id);
}

fn main() -> io::Result<()> {
    let logger_env = env_logger::Env::default().filter_or("LOG_LEVEL", "info");
    env_logger::Builder::from_env(logger_env).format_timestamp_millis().init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let auth = Arc::new(MemoryAuthStore::new());
    let store = StoreHandle::spawn(MemoryGameStore::new(), config.store_timeout);
    for username in &config.users {
        match auth.make_auth(username) {
            Ok(token) => log::info!("Auth token for {}: {}", username, token),
            Err(e) => log::error!("Cannot create auth token for {}: {}", username, e),
        }
    }
    for name in &config.games {
        match store.create(name) {
            Ok(id) => log::info!("Created game {} ({})", id, name),
            Err(e) => log::error!("Cannot create game {}: {}", name, e),
        }
    }

    let server = Arc::new(GameServer::new(Arc::new(SessionRegistry::new()), store, auth));
    let listener = TcpListener::bind(config.bind_addr)?;
    log::info!("Listening on {}", config.bind_addr);

    for stream in listener.incoming() {
        let tcp_stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::error!("Cannot use tcp stream: {}", e);
                continue
            }
        };
        let server = server.clone();
        spawn(move || handle_client(server, tcp_stream));
    }
    Ok(())
}
