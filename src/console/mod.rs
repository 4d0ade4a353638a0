pub mod command;
mod service;

pub use service::ConsoleService;
