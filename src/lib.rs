pub mod board;
pub mod moves;
pub mod game;
pub mod communication_protocol;
pub mod error;
pub mod storage;
pub mod session_registry;
pub mod game_server;
pub mod config;
