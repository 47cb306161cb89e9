//! Endless MP4 to RTMP restreamer.
//!
//! Publishes a directory of MP4 files to an RTMP ingest endpoint as one
//! continuous live stream. Configuration lives in `config.json` next to
//! the binary; resume state is kept in `stream_state.json`.

use tracing::{error, info};

use restreamer_engine::{Config, Supervisor};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match Config::load_or_init("config.json") {
        Ok(config) => config,
        Err(e) => {
            error!("could not load configuration: {e}");
            std::process::exit(1);
        }
    };

    info!("starting restreamer");
    let mut supervisor = Supervisor::new(config);
    supervisor.run()
}
