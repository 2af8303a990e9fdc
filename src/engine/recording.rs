//! In-process engine that records outbound frames instead of writing them to
//! the network. Used by the test suite, the `replay` command and the demo.

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::{EventSink, NativeEngine, StopCallback};
use crate::error::EngineError;
use crate::frame::{Headers, OutboundFrame};
use crate::identity::StreamId;
use crate::server::config::EngineConfig;

#[derive(Default)]
pub struct RecordingEngine {
    frames: Mutex<Vec<OutboundFrame>>,
    sink: Mutex<Option<EventSink>>,
    running: Mutex<Option<EngineConfig>>,
    stop_failure: Mutex<Option<String>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for injecting events, available once a server has subscribed
    pub fn sink(&self) -> Option<EventSink> {
        self.sink.lock().clone()
    }

    /// All frames sent so far, in emission order
    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().clone()
    }

    pub fn take_frames(&self) -> Vec<OutboundFrame> {
        std::mem::take(&mut *self.frames.lock())
    }

    pub fn frames_for(&self, stream_id: &StreamId) -> Vec<OutboundFrame> {
        self.frames
            .lock()
            .iter()
            .filter(|frame| frame.stream_id() == stream_id)
            .cloned()
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Configuration passed to the last successful `start`
    pub fn config(&self) -> Option<EngineConfig> {
        self.running.lock().clone()
    }

    /// Make the next `stop` fail synchronously with `reason`
    pub fn fail_next_stop(&self, reason: impl Into<String>) {
        *self.stop_failure.lock() = Some(reason.into());
    }
}

impl NativeEngine for RecordingEngine {
    fn subscribe(&self, sink: EventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn send_headers_frame(&self, stream_id: &StreamId, headers: &Headers) -> Result<(), EngineError> {
        debug!(stream_id = %stream_id, count = headers.len(), "HEADERS frame recorded");
        self.frames.lock().push(OutboundFrame::Headers {
            stream_id: stream_id.clone(),
            headers: headers.clone(),
        });
        Ok(())
    }

    fn send_data_frame(
        &self,
        stream_id: &StreamId,
        data: Option<Bytes>,
        fin: bool,
    ) -> Result<(), EngineError> {
        debug!(
            stream_id = %stream_id,
            len = data.as_ref().map_or(0, Bytes::len),
            fin,
            "DATA frame recorded"
        );
        self.frames.lock().push(OutboundFrame::Data {
            stream_id: stream_id.clone(),
            data,
            fin,
        });
        Ok(())
    }

    fn start(&self, config: &EngineConfig) -> Result<(), EngineError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        *running = Some(config.clone());
        Ok(())
    }

    fn stop(&self, on_stopped: StopCallback) -> Result<(), EngineError> {
        if let Some(reason) = self.stop_failure.lock().take() {
            return Err(EngineError::Failed(reason));
        }
        if self.running.lock().take().is_none() {
            return Err(EngineError::NotRunning);
        }

        // Closing the sink ends the server's dispatch loop once it drains.
        self.sink.lock().take();
        on_stopped();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            certificate_file: "cert.pem".into(),
            certificate_file_ca: None,
            port: 4433,
            private_key_file: "key.pem".into(),
        }
    }

    #[test]
    fn records_frames_in_order() {
        let engine = RecordingEngine::new();
        let id = StreamId::from("0");
        engine.send_headers_frame(&id, &Headers::new()).unwrap();
        engine.send_data_frame(&id, None, true).unwrap();

        let frames = engine.take_frames();
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].is_fin());
        assert!(frames[1].is_fin());
        assert!(engine.frames().is_empty());
    }

    #[test]
    fn start_twice_is_rejected() {
        let engine = RecordingEngine::new();
        engine.start(&config()).unwrap();
        assert!(matches!(engine.start(&config()), Err(EngineError::AlreadyRunning)));
        assert_eq!(engine.config().map(|c| c.port), Some(4433));
    }

    #[test]
    fn stop_without_start_fails_synchronously() {
        let engine = RecordingEngine::new();
        let result = engine.stop(Box::new(|| panic!("must not be called")));
        assert!(matches!(result, Err(EngineError::NotRunning)));
    }
}
