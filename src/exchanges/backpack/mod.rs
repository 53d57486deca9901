pub mod auth;
pub mod builder;
pub mod codec;
pub mod connector;
pub mod constants;
pub mod converters;
pub mod normalizer;
pub mod rest;
pub mod types;

// Re-export main types for easier importing
pub use auth::{instruction_for, BackpackAuth, Instruction};
pub use builder::{build_connector, build_connector_with_stream_config};
pub use codec::{BackpackCodec, BackpackMessage};
pub use connector::BackpackConnector;
pub use rest::BackpackRestClient;
