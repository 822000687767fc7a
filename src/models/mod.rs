// Upstream API models

pub mod spotify;
