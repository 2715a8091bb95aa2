pub mod crypto;
pub mod gpg;
