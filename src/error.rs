use crate::game::RuleError;
use crate::session_registry::RegistryError;
use crate::storage::{AuthError, GameId, SeatError, StoreError};

/// The category of a failed command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Auth,
    RuleViolation,
    NotFound,
    Persistence,
}

/// Why a command was rejected. Every variant is reported to the sender only.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("bad command: {0}")]
    Protocol(String),

    #[error("not allowed: {0}")]
    Auth(String),

    #[error("illegal move: {0}")]
    Rule(#[from] RuleError),

    #[error("the game is over, no more moves are allowed")]
    GameOver,

    #[error("game {0} not found")]
    NotFound(GameId),

    #[error("could not save the game: {0}")]
    Persistence(StoreError),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Protocol(_) => ErrorKind::Protocol,
            CommandError::Auth(_) => ErrorKind::Auth,
            CommandError::Rule(_) | CommandError::GameOver => ErrorKind::RuleViolation,
            CommandError::NotFound(_) => ErrorKind::NotFound,
            CommandError::Persistence(_) => ErrorKind::Persistence,
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => CommandError::NotFound(id),
            other => CommandError::Persistence(other),
        }
    }
}

impl From<AuthError> for CommandError {
    fn from(error: AuthError) -> Self {
        CommandError::Auth(error.to_string())
    }
}

impl From<SeatError> for CommandError {
    fn from(error: SeatError) -> Self {
        CommandError::Auth(error.to_string())
    }
}

impl From<RegistryError> for CommandError {
    fn from(error: RegistryError) -> Self {
        CommandError::Protocol(error.to_string())
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(error: serde_json::Error) -> Self {
        CommandError::Protocol(error.to_string())
    }
}

#[cfg(test)]
mod test {
    use crate::board::Position;
    use crate::error::{CommandError, ErrorKind};
    use crate::game::RuleError;
    use crate::storage::{AuthError, GameId, StoreError};

    #[test]
    fn test_error_kinds() {
        let no_piece = RuleError::NoPiece(Position::new(3, 3).unwrap());
        assert_eq!(CommandError::from(no_piece).kind(), ErrorKind::RuleViolation);
        assert_eq!(CommandError::GameOver.kind(), ErrorKind::RuleViolation);
        assert_eq!(CommandError::from(StoreError::NotFound(GameId(4))).kind(), ErrorKind::NotFound);
        assert_eq!(CommandError::from(StoreError::Timeout).kind(), ErrorKind::Persistence);
        assert_eq!(CommandError::from(AuthError::Unauthorized).kind(), ErrorKind::Auth);
        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(CommandError::from(bad_json).kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(CommandError::NotFound(GameId(7)).to_string(), "game 7 not found");
        let no_piece = RuleError::NoPiece(Position::new(3, 3).unwrap());
        assert_eq!(CommandError::from(no_piece).to_string(), "illegal move: there is no piece on c3");
    }
}
