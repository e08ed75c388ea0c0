pub mod auth;
pub mod config;
pub mod location;
pub mod restaurants;
pub mod theme;
