//! Self-custodial EVM wallet core: passcode-sealed seed custody with a duress passcode,
//! plus native and ERC-20 dispatch across several networks.
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

pub mod amount;
pub mod assets;
pub mod chains;
pub mod cli_output;
pub mod config;
pub mod custody;
pub mod dispatch;
pub mod envelope;
pub mod errors;
pub mod fsutil;
pub mod kv;
pub mod mnemonic;
pub mod onramp;
pub mod paths;
pub mod records;
pub mod retry;
pub mod store;
