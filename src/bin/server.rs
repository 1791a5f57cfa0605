use log::{error, info, warn};
use tokio::net::TcpListener;

use rusty_chat::config::ServerConfig;
use rusty_chat::core::server::ChatServer;
use rusty_chat::handlers::serve;

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match dotenv {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    let mut config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // A single optional argument overrides the listen port
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {}
        [port] => {
            if let Err(e) = config.apply_port_arg(port) {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        _ => {
            error!("Invalid arguments. Usage: rusty_chat [port]");
            std::process::exit(1);
        }
    }

    info!(
        "Configuration: host={}, port={}, sessions={}, rooms={}, history={}",
        config.host, config.port, config.max_sessions, config.max_rooms, config.history_size
    );

    let addr = config.bind_addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Starting Rusty Chat server on {}", addr);
    serve(listener, ChatServer::shared(config)).await;
}
