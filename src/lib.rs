//! QueryPal chat client: a persisted conversation with a streaming
//! analytics assistant.

pub mod backend;
pub mod clock;
pub mod config;
pub mod controller;
pub mod input;
pub mod prompts;
pub mod session;
pub mod storage;
pub mod types;

#[cfg(feature = "ui")]
pub mod ui;
#[cfg(feature = "ui")]
pub mod views;
