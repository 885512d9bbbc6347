pub mod abi;
pub mod config;
pub mod deployment;
pub mod error;
pub mod events;
pub mod ledger;
pub mod output;
pub mod rpc;
pub mod scanner;
