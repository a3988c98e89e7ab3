use crate::board::Color;
use crate::game::Game;
use crate::moves::Move;
use crate::storage::GameId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Connect,
    Observe,
    MakeMove,
    Leave,
    Resign,
}

/// A command from a client. `move` is only read for MAKE_MOVE, `playerColor` only for CONNECT.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonMsg {
    pub command_type: CommandType,
    pub auth_token: String,
    #[serde(rename = "gameID")]
    pub game_id: GameId,
    #[serde(rename = "move", default, skip_serializing_if = "Option::is_none")]
    pub make_move: Option<Move>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_color: Option<Color>,
}

impl JsonMsg {
    pub fn new(command_type: CommandType, auth_token: &str, game_id: GameId) -> Self {
        JsonMsg { command_type, auth_token: auth_token.to_string(), game_id, make_move: None, player_color: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "serverMessageType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMsg {
    LoadGame {
        game: Game,
        perspective: Option<Color>,
    },
    Notification {
        message: String,
    },
    Error {
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

impl ServerMsg {
    pub fn load_game(game: &Game, perspective: Option<Color>) -> Self {
        ServerMsg::LoadGame { game: game.clone(), perspective }
    }

    pub fn notification(message: impl Into<String>) -> Self {
        ServerMsg::Notification { message: message.into() }
    }

    pub fn error(error_message: impl Into<String>) -> Self {
        ServerMsg::Error { error_message: error_message.into() }
    }
}
