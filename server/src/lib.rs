//! Mentionbot Server
//!
//! Answers social mentions: a webhook gateway acknowledges each mention at
//! once, an AI agent turns the prompt into a reply, and a rate-limited queue
//! posts the reply back to the network.

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod mentions;
pub mod observability;
pub mod publish;
pub mod ratelimit;
pub mod replies;
