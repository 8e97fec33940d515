use super::{Component, ComponentState, MotionCamOrchestrator};
use crate::error::{MotionCamError, Result};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

const COMPONENT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl MotionCamOrchestrator {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Cancel all background tasks
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        // Stop components in reverse dependency order
        for component in Component::SHUTDOWN_ORDER {
            if let Err(e) = self.stop_component(component).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Stop a specific component
    async fn stop_component(&mut self, component: Component) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let outcome = match component {
            Component::Detection => timeout(COMPONENT_STOP_TIMEOUT, self.detection.stop()).await,
            Component::Assembler => {
                // An in-flight capture finishes its post-roll before the assembler stops
                let limit = self.settings.snapshot().post_roll() + COMPONENT_STOP_TIMEOUT;
                timeout(limit, self.assembler.stop()).await
            }
            Component::Recording => timeout(COMPONENT_STOP_TIMEOUT, self.recorder.stop()).await,
            Component::Source => {
                if !self.source_open {
                    self.set_component_state(component, ComponentState::Stopped)
                        .await;
                    return Ok(());
                }
                self.source_open = false;
                timeout(COMPONENT_STOP_TIMEOUT, self.source.close()).await
            }
        };

        match outcome {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("{} component stop timeout", component);
                Err(MotionCamError::System {
                    message: format!("{} component stop timeout", component),
                })
            }
        }
    }
}
