pub mod extractor;
pub mod signature;

pub use extractor::{AuthClient, require_signature};
