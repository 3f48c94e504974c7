//! # chatter-client
//!
//! The connecting side of a Chatter link.
//!
//! - [`ChatClient`]: connects, announces a username, sends chat lines
//! - [`ClientEvent`]: messages, roster changes and connection loss, in arrival order
//! - [`ClientConfig`]: timings built from settings

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod events;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use events::ClientEvent;
