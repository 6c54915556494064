//! Graphene Gateway
//!
//! A client-side runtime for BitShares-style delegated-proof-of-stake
//! nodes. This library provides:
//!
//! - A supervised WebSocket RPC connection with request correlation,
//!   push-subscription routing, keep-alive and reconnection
//! - Transfer fee estimation in any asset
//! - Weighted multi-signature authority resolution
//! - Transaction building, signing and broadcast
//! - Account activity tracking with a persisted, resumable cursor
//! - A send worker pool and a JSON-RPC service on top of it
//!
//! # Architecture
//!
//! One [`NodeConnection`] owns the channel to the node. Every other
//! component talks to the node through [`NodeApi`], a typed layer over
//! [`NodeConnection::call`]. The [`ActivityTracker`] and the transaction
//! builder are independent consumers of the same connection.
//!
//! # Security Model
//!
//! Private keys never leave the gateway. Transactions are serialized and
//! signed locally; the node only sees signed transactions.

pub mod amount;
pub mod assets;
pub mod authority;
pub mod chain;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod fees;
pub mod keystore;
pub mod node_api;
pub mod objects;
pub mod output;
pub mod send_pool;
pub mod service;
pub mod tracker;
pub mod transaction;
pub mod wallet;

pub use authority::{AuthorityResolver, Permission};
pub use config::GatewayConfig;
pub use connection::{Api, ConnectionOptions, ConnectionState, Connector, NodeConnection};
pub use error::{Error, MissingKey, Result};
pub use fees::FeeCalculator;
pub use node_api::NodeApi;
pub use send_pool::SendWorkerPool;
pub use tracker::{ActivityTracker, TransferEvent};
pub use transaction::TransactionBuilder;
pub use wallet::{TransferRequest, Wallet};
