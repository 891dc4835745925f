use log::info;
use sketchpad_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("Starting sketchpad server...");

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Bad configuration: {e}");
            std::process::exit(2);
        }
    };
    info!("Room {} on {}", config.room_id, config.bind_addr);

    if let Err(e) = SyncServer::new(config).run().await {
        log::error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
