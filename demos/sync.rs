use flagd_sync::{PayloadType, SyncConfig, SyncConnector};

pub fn main() {
    env_logger::init();

    let base_url =
        std::env::var("FLAGD_SYNC_URL").unwrap_or_else(|_| SyncConfig::DEFAULT_BASE_URL.to_owned());
    let mut config = SyncConfig::new().with_base_url(base_url);
    if let Ok(token) = std::env::var("FLAGD_SYNC_TOKEN") {
        config = config.with_token(token);
    }

    // Start a background worker subscribing to the sync stream.
    let connector = SyncConnector::start(config).unwrap();
    let stream = connector.stream();

    // Print the first few payloads. Error notices mean the connector is reconnecting; keep using
    // the last configuration until a new snapshot arrives.
    for payload in stream.iter().take(5) {
        match payload.kind() {
            PayloadType::Data => println!("configuration: {}", payload.content()),
            PayloadType::Error => println!("stream error: {}", payload.content()),
        }
    }

    connector.shutdown().unwrap();
}
