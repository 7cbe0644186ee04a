//! Client library for the StormForge Optimize API.
//!
//! The crate is organized around four pieces:
//!
//! - [`meta`] - link-relation metadata attached to every fetched entity
//! - [`lister`] - generic traversal of server-paginated collections
//! - [`activity`] - the activity feed data model and query shaping
//! - [`subscribe`] - the polling subscription state machine and the
//!   hub-type strategy registry
//!
//! [`api`] holds the transport boundary: the traits the above consume and
//! the reqwest-backed [`api::Client`]. [`resources`] carries the plain
//! REST records. The `stormwatch` binary is a thin front end that wires a
//! client, a lister, and a subscriber to the terminal.
//!
//! # Example
//!
//! ```ignore
//! use stormwatch::api::Client;
//! use stormwatch::subscribe::{SubscriberConfig, SubscriberRegistry};
//!
//! let client = Client::new("https://api.stormforge.io", token)?;
//! let registry = SubscriberRegistry::new(client.clone());
//! let subscriber = registry.subscriber(&feed, SubscriberConfig::default());
//! tokio::spawn(subscriber.subscribe(cancel, tx));
//! ```

pub mod activity;
pub mod api;
pub mod config;
pub mod lister;
pub mod meta;
pub mod resources;
pub mod subscribe;
