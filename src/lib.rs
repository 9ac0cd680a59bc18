pub mod agent;
pub mod config;
pub mod console;
pub mod controller;
pub mod debugger;
pub mod error;

pub use error::{DebuggerError, Result};
