pub mod config;
pub mod devices;
pub mod error;
pub mod inventory;
pub mod io;
pub mod parse;
pub mod paths;
pub mod shell;
pub mod telnet;
pub mod workflow;

pub use error::{Result, SautoError};
