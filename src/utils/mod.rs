//! Utility modules

pub mod net;

pub use net::{access_urls, private_ip};
