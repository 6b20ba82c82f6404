pub mod client;
pub mod config;
pub mod error;
pub mod normalize;
pub mod rotation;
pub mod stylist;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{GeminiClient, CLASSIFICATION_PROMPT};
pub use config::ClientConfig;
pub use error::{ClientError, StylistError};
pub use rotation::CredentialPool;
pub use stylist::Stylist;
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
