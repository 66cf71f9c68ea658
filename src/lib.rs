mod app;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod detection;
pub mod error;
pub mod host;
pub mod messages;
pub mod session;
pub mod sim;
pub mod surfaces;
pub mod utils;

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};

pub use app::{App, PageHandle};
use config::Config;
use messages::Message;
use sim::{SimulatedCamera, SimulatedPipelineLoader};
use surfaces::{PageNotice, PageRenderer};

/// Renders a page into the log, for running headless.
struct LogRenderer;

impl PageRenderer for LogRenderer {
    fn apply_degradation(&mut self) {
        warn!("screen degraded: blink to restore");
    }

    fn remove_degradation(&mut self) {
        info!("screen restored");
    }

    fn show_reminder(&mut self) {
        info!("BLINK!");
    }

    fn hide_reminder(&mut self) {}

    fn pulse_reminder(&mut self) {
        info!("BLINK!");
    }

    fn post_notice(&mut self, notice: PageNotice) {
        match notice {
            PageNotice::Error(payload) => warn!("{}", payload.message),
            PageNotice::BlinkDetected => info!("blink"),
            other => log::debug!("page notice {other:?}"),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    utils::logging::init();
    info!("Blink or Die starting up...");

    let config = Config::from_env();
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;

    runtime.block_on(async move {
        let app = App::start(
            config,
            SimulatedCamera::new(true),
            Arc::new(SimulatedPipelineLoader::default()),
        )
        .await?;
        let page = app.open_page(LogRenderer);

        let reply = app.request(Message::StartDetection).await?;
        if !reply.ok {
            warn!("detection did not start: {:?}", reply.error);
        }

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("shutting down");

        // No STOP: the session flag stays set so the next launch resumes.
        page.close().await?;
        app.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })
}
