pub mod connection;
pub mod indexes;
pub mod models;
pub mod store;

pub use connection::connect;
