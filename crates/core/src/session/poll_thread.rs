use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::shared::SessionCore;
use crate::error::{Result, RtpError};

/// Background thread that waits for inbound data and runs the session's
/// processing pass.
pub(crate) struct PollThread {
    running: Arc<AtomicBool>,
    core: Arc<SessionCore>,
    handle: Option<JoinHandle<()>>,
}

impl PollThread {
    pub fn start(core: Arc<SessionCore>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            let core = core.clone();
            thread::Builder::new()
                .name("rtp-poll".into())
                .spawn(move || poll_loop(&core, &running))
                .map_err(RtpError::ThreadSpawn)?
        };
        tracing::debug!("poll thread started");
        Ok(Self {
            running,
            core,
            handle: Some(handle),
        })
    }

    /// Signal the thread, interrupt its wait and join it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        // The thread may be between waits; the wake-up is kept for its next one.
        let _ = self.core.transmitter.abort_wait();
        if handle.join().is_err() {
            tracing::warn!("poll thread panicked");
        }
    }
}

impl Drop for PollThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(core: &SessionCore, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        let delay = core.rtcp_delay();
        if let Err(e) = core.transmitter.wait_for_incoming_data(delay) {
            tracing::warn!(error = %e, "poll thread wait failed");
            core.handler.on_poll_thread_error(&e);
            break;
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = core.transmitter.poll() {
            tracing::warn!(error = %e, "poll thread transmitter poll failed");
            core.handler.on_poll_thread_error(&e);
            break;
        }
        if let Err(e) = core.process_polled_data() {
            tracing::warn!(error = %e, "poll thread processing failed");
            core.handler.on_poll_thread_error(&e);
            break;
        }
        core.handler.on_poll_thread_step();
    }
    tracing::debug!("poll loop exited");
}
