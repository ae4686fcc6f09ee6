//! Transaction coordinator
//!
//! Sits between data-access clients and the document store: it owns live
//! store sessions keyed by transaction ID, dispatches opcode-tagged
//! operations at the right session, publishes state-change events, and
//! reconciles whatever the happy path leaves behind.

mod config;
mod dispatcher;
mod error;
mod manager;
mod pubsub;
mod reconcile;
mod server;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{Result, TxnError};
pub use manager::{CachedTxn, TxnManager, TXN_COLLECTION};
pub use pubsub::Publisher;
pub use reconcile::Reconciler;
pub use server::{RpcService, Server};
