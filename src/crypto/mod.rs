pub mod gcm;
pub mod hkdf;
pub mod key_pair;
