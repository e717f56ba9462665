pub mod actions;
pub mod cli;
pub mod config;

pub use actions::*;
pub use cli::{Cli, Command, PriceArgs, TokenRef};
