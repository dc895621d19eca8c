pub mod settings;

pub use settings::{
    AiConfig, LeadsConfig, LimitsConfig, LoggingConfig, ServerConfig, SessionConfig, Settings,
};
