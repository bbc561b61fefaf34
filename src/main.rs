use clap::Parser;
use llm_bridge::{build_router, AppState, Gateway, GatewayConfig, ProviderDirectory, Registry, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "llm-bridge",
    about = "Bidirectional LLM gateway: translate between Anthropic, OpenAI, and Gemini chat APIs",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Request-log file path (overrides config)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. llm-bridge.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/llm-bridge/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/llm-bridge/config.toml");
            println!("     ~/.config/llm-bridge/config.toml");
        }
        println!("  3. ~/.llm-bridge.toml");
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(log_file) = cli.log_file {
        config.log_file = Some(log_file);
    }
    config.resolve_api_keys()?;

    let logger = SharedLogger::new(config.log_file.as_deref())?;

    let mut client_builder =
        reqwest::Client::builder().connect_timeout(std::time::Duration::from_secs(30));
    if let Some(proxy) = &config.https_proxy {
        client_builder = client_builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    let client = client_builder.build()?;

    let registry = Arc::new(Registry::with_builtins(client.clone())?);
    for decl in &config.transformers {
        registry.declare(&decl.name, &decl.backend, &decl.options)?;
    }

    let directory = Arc::new(ProviderDirectory::new());
    for provider in config.providers.clone() {
        let name = provider.name.clone();
        if let Err(e) = directory.register(provider) {
            tracing::warn!(provider = %name, "skipping invalid provider: {e}");
        }
    }

    let gateway = Arc::new(Gateway::new(
        client,
        registry,
        directory,
        logger.clone(),
        config.timeout_secs,
    ));

    info!("llm-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Providers:    {}", config.providers.len());
    info!("  Transformers: {} declared", config.transformers.len());
    info!("  Timeout:      {}s", config.timeout_secs);
    if let Some(path) = &config.log_file {
        info!("  Log file:     {}", path.display());
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        gateway,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  Anthropic endpoint: POST /v1/messages");
    info!("  OpenAI endpoint:    POST /v1/chat/completions");
    info!("  Gemini endpoint:    POST /v1beta/models/{{model}}:generateContent");

    axum::serve(listener, app).await?;

    Ok(())
}
