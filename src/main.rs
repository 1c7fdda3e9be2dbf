use chrono::Local;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use waconnect::transport::WebSocketTransportFactory;
use waconnect::{Config, Supervisor};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    // The environment is read exactly once, here.
    let config = Config::from_env();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let (delivery_tx, mut delivery_rx) = mpsc::channel(256);

        let supervisor = Arc::new(
            Supervisor::new(config, Arc::new(WebSocketTransportFactory::new()), delivery_tx)
                .await
                .expect("Failed to initialise session store"),
        );

        // Stand-in consumer for the event-delivery subsystem: the outer
        // layer replaces this with its webhook dispatcher.
        tokio::task::spawn(async move {
            while let Some(record) = delivery_rx.recv().await {
                match serde_json::to_string(&record) {
                    Ok(json) => info!("event: {json}"),
                    Err(e) => warn!("Failed to serialise event record: {e}"),
                }
            }
        });

        match supervisor.load_persisted().await {
            Ok(count) if count > 0 => info!("Loaded {count} persisted session(s)"),
            Ok(_) => {}
            Err(e) => warn!("Failed to load persisted sessions: {e}"),
        }

        info!("waconnect gateway running, press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for shutdown signal");

        info!("Shutting down gracefully...");
        supervisor.disconnect_all().await;
    });
}
