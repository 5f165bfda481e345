pub mod crypto;
pub mod sanitizer;
pub mod secrets;

pub use sanitizer::Sanitizer;
pub use secrets::SecretStore;
