pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod messages;
pub mod presence;
pub mod router;
pub mod summary;
pub mod typing;
pub mod users;
pub mod ws;
