//! InstaRelay Server - Instagram webhook relay.
//!
//! This crate receives Instagram messaging webhooks and republishes them to
//! connected real-time clients:
//! - Confirming webhook ownership during the subscription handshake
//! - Enriching each inbound message with sender details from the Graph API
//! - Broadcasting normalized events to WebSocket subscribers
//!
//! # Architecture
//!
//! The server sits between Instagram (event producer) and WebSocket clients
//! (event consumers). Events are enriched and relayed in real time without
//! persistent storage.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod instagram;
pub mod processor;
pub mod routes;
pub mod types;
pub mod verify;
