pub mod auth;
pub mod config;
pub mod convert;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod server;
pub mod sse;
pub mod transformer;
pub mod unified;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use logging::SharedLogger;
pub use provider::{Provider, ProviderDirectory};
pub use server::{build_router, AppState};
pub use transformer::Registry;
pub use unified::UnifiedChatRequest;
