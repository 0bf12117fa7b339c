use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::info;

use super::errors::PipelineError;
use super::pipeline::StopToken;

/// Stops a token when the process is asked to terminate.
///
/// The watcher thread exits when this value is dropped.
pub struct ShutdownSignal {
    handle: Handle,
    token: StopToken,
}

impl ShutdownSignal {
    pub fn install() -> Result<ShutdownSignal, PipelineError> {
        let mut signals =
            Signals::new(&[SIGHUP, SIGINT, SIGQUIT, SIGTERM]).map_err(PipelineError::SignalHook)?;
        let handle = signals.handle();
        let token = StopToken::new();
        let closing = token.clone();
        thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    info!(signal, "termination signal received");
                    closing.stop();
                }
            })
            .map_err(PipelineError::SignalHook)?;
        Ok(ShutdownSignal { handle, token })
    }

    /// Stopped once a signal arrives.
    pub fn token(&self) -> &StopToken {
        &self.token
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        self.handle.close();
    }
}
