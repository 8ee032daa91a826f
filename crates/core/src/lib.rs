pub mod backend;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod logger;
pub mod notify;
pub mod platform;
pub mod probe;
pub mod region;
pub mod runtime;
pub mod targets;
pub mod trigger;
pub mod types;
