/// ACME protocol primitives: directory, nonce handling, JWK/JWS, problem documents
pub mod directory;
pub mod jwk;
pub mod jws;
pub mod nonce;
pub mod problem;

pub use directory::{Directory, DirectoryClient, DirectoryMeta};
pub use jwk::Jwk;
pub use nonce::NonceCache;
pub use problem::Problem;
