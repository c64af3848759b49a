//! Balance top-ups through external checkout pages

pub mod gateway;

pub use gateway::{CheckoutGateway, CryptoGateway, RialGateway};
