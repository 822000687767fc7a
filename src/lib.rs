// Spotify Gateway - Library root for testing

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod routes;
