//! Production capability implementations over external services.

pub mod gateway;
pub mod openai;

pub use gateway::{GatewayClient, GatewayError};
pub use openai::OpenAiClient;
