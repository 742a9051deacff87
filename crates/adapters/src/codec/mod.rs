//! Wire codecs for the update protocol: compression, integrity,
//! encryption, and the address allow-list.

pub mod encryption;
pub mod gzip;
pub mod signing;
pub mod subnet;

pub use encryption::{BodyDecryptor, BodyEncryptor};
pub use signing::{BodySigner, HASH_HEADER};
pub use subnet::{REAL_IP_HEADER, TrustedSubnet};
