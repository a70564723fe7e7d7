use std::sync::Arc;

use crate::audio::LevelMeter;
use crate::session::SessionHandle;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the running session controller
    pub session: SessionHandle,

    /// Input/output levels for visualization
    pub meter: Arc<LevelMeter>,
}

impl AppState {
    /// Must be called inside a Tokio runtime (the meter spawns followers)
    pub fn new(session: SessionHandle) -> Self {
        let meter = LevelMeter::spawn(
            session.subscribe_input_tap(),
            session.subscribe_output_tap(),
        );

        Self {
            session,
            meter: Arc::new(meter),
        }
    }
}
