#[macro_use]
extern crate lazy_static;

pub mod ci;
pub mod client;
pub mod common;
pub mod config;
pub mod error;
pub mod event;
pub mod github;
pub mod model;
pub mod parser;
pub mod scheduler;
pub mod store;
pub mod supervisor;

pub use error::{Error, ErrorKind};
pub use supervisor::Supervisor;
