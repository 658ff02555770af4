use watchroom_collab::{Collab, RuntimeConfig};

mod logging;

#[tokio::main]
async fn main() {
    let config = RuntimeConfig::from_env();
    logging::init_logger(&config);

    let collab = Collab::new(config).await;
    watchroom_server::run_server(collab).await;
}
