use super::{Component, ComponentState, MotionCamOrchestrator};
use std::collections::HashMap;
use tracing::debug;

impl MotionCamOrchestrator {
    pub(super) async fn set_component_state(&self, component: Component, state: ComponentState) {
        debug!("Component '{}' -> {:?}", component, state);
        self.component_states.lock().await.insert(component, state);
    }

    pub async fn component_state(&self, component: Component) -> Option<ComponentState> {
        self.component_states.lock().await.get(&component).cloned()
    }

    pub async fn component_states(&self) -> HashMap<Component, ComponentState> {
        self.component_states.lock().await.clone()
    }

    /// True when every component that was started is running
    pub async fn is_healthy(&self) -> bool {
        self.component_states
            .lock()
            .await
            .values()
            .all(|state| *state == ComponentState::Running)
    }
}
