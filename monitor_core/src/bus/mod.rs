//! Message Bus Client: credential bootstrap, AMQP connection lifecycle,
//! consumer drain, and publisher with retry/backoff (spec §4.6).

pub mod backoff;
pub mod bootstrap;
pub mod client;
pub mod signer;

pub use bootstrap::{bootstrap, BootstrapConfig, BootstrapCredentials};
pub use client::{InboundTask, MessageBusClient, Publisher};
pub use signer::{HmacSha1Signer, RequestSigner, SignedRequest};
