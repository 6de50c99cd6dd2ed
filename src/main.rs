use std::{
    process,
    sync::{Arc, OnceLock},
};

use mtrwatch::{
    config::Config,
    core::{
        filter::CountryFilter, lifecycle::Coordinator, pipeline::ReportPipeline,
        render::TableRenderer,
    },
    logger::LoggerManager,
    print_error,
};
use mtrwatch_mqtt::{MqttConnectionSet, SharedHandler};
use tracing::{debug, error, info};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

#[tokio::main]
async fn main() {
    let cfg = config();
    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting mtrwatch version {}...", env!("CARGO_PKG_VERSION"));
    debug!("MQTT Client ID: {}", cfg.subscriber.client_id);
    debug!("{:#?}", cfg.subscriber);

    if cfg.country_code.is_empty() {
        info!("Showing reports from every country");
    } else {
        info!("Showing reports from country {}", cfg.country_code);
    }

    let pipeline = Arc::new(ReportPipeline::new(
        CountryFilter::new(cfg.country_code.clone()),
        TableRenderer::stdout(cfg.colored),
    ));
    let handler: SharedHandler = pipeline.clone();

    info!(
        "Subscribing to {} on {} broker(s)...",
        cfg.subscriber.topic,
        cfg.subscriber.brokers.len()
    );
    let mut connections = MqttConnectionSet::connect(cfg.subscriber.clone(), handler)
        .await
        .unwrap_or_else(|e| {
            error!("{}", e);
            process::exit(1);
        });

    let coordinator = Coordinator::new(cfg.disconnect_grace);
    let code = match coordinator.run(&mut connections).await {
        Ok(status) => status.code(),
        Err(e) => {
            error!("{}", e);
            connections.disconnect_all(cfg.disconnect_grace).await;
            1
        }
    };

    info!("Report totals: {}", pipeline.stats());
    info!("Shutdown complete");
    process::exit(code);
}
