use super::{MotionCamOrchestrator, ShutdownHandle, ShutdownReason};
use crate::error::{MotionCamError, Result};
use std::time::Duration;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

impl MotionCamOrchestrator {
    /// Run until a signal or a shutdown request arrives, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("motioncam is running");

        let mut shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| MotionCamError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        // Spawn signal handlers
        self.setup_signal_handlers();

        let mut report = interval(STATUS_REPORT_INTERVAL);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);
        report.tick().await;

        let shutdown_reason = loop {
            tokio::select! {
                reason = &mut shutdown_receiver => {
                    break reason.map_err(|_| MotionCamError::System {
                        message: "Shutdown channel closed unexpectedly".to_string(),
                    })?;
                }
                _ = report.tick() => {
                    info!("Status: {}", self.status().summary());
                }
            }
        };

        info!("Shutdown initiated: {:?}", shutdown_reason);

        // Perform graceful shutdown
        let exit_code = self.shutdown().await?;

        info!("motioncam shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let handle = self.shutdown_handle();
            let token = self.cancellation_token.clone();
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                tokio::select! {
                    _ = token.cancelled() => {}
                    Some(()) = sigterm.recv() => {
                        info!("Received SIGTERM signal");
                        handle.request(ShutdownReason::Signal("SIGTERM".to_string())).await;
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        spawn_ctrl_c_handler(self.shutdown_handle(), self.cancellation_token.clone());
    }
}

fn spawn_ctrl_c_handler(handle: ShutdownHandle, token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    handle.request(ShutdownReason::Signal("SIGINT".to_string())).await;
                }
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            }
        }
    });
}
