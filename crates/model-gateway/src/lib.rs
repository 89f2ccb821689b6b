pub mod error;
pub mod http_model;
pub mod provider;
pub mod secrets;
pub mod usage;

pub use error::{GatewayError, GatewayResult};
pub use http_model::HttpChatModel;
pub use provider::{Binding, ModelGateway, ProviderKind, ProviderRecord};
pub use secrets::{decrypt_secret, encrypt_secret, mask_secret, parse_encryption_key, EncryptedSecret};
pub use usage::UsageAggregator;
