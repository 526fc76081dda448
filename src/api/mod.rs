pub mod client;
pub mod models;
pub mod store;

pub use client::ApiClient;
pub use store::ChannelStore;
