pub mod settings;

pub use settings::{ChatSettings, DatabaseSettings, Settings, StoreBackend, StoreSettings};
