mod daemon;
pub use daemon::{reserve_port, NodeDaemon};

#[allow(clippy::module_inception)]
mod node;
pub use node::{LightningNode, UNCONFIRMED_TX_CONFIRMED_LOG, UNCONFIRMED_TX_SEEN_LOG};

#[cfg(test)]
mod tests;
