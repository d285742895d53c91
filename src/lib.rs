pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod handlers;
pub mod ledger;
pub mod paths;
pub mod reconcile;
pub mod remote;
pub mod store;

#[cfg(test)]
pub mod testing;
