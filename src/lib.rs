#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

mod client;
mod config;
mod connection;
mod error;
mod flags;
mod frame;
mod hpack;
mod priority_queue;
mod request;
mod response;
mod server;
mod stream;
mod stream_table;
mod types;

pub use bytes::Bytes;
pub use config::Config;
pub use connection::{Connection, PushedStream};
pub use error::{ConnectionError, Http2Error, StreamError};
pub use frame::{Frame, FrameHeader, Padding};
pub use request::{Method, Request};
pub use response::Response;
pub use server::{serve, ResponseWriter};
pub use stream_table::Role;
pub use types::{ErrorType, FrameType, HeaderList, SettingsParameter, StreamId};
