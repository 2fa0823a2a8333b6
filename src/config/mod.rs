mod settings;

pub use settings::{
    CacheBackendKind, CacheConfig, DatabaseConfig, DispatcherConfig, LoggingConfig, Settings,
};
