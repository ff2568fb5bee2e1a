//! Channel driver - owns one device channel for the life of a session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::events::{CloseReason, HdpEvent, HdpObserver, PacketDirection, TracingObserver};
use crate::measurement::Measurement;
use crate::protocol::constants::{
    DEFAULT_READ_BUFFER_SIZE, DEFAULT_SETTLE_DELAY_MS, DEFAULT_WRITE_QUEUE_DEPTH, HEADER_SIZE,
};
use crate::protocol::hex::to_hex;
use crate::protocol::{OutboundFrame, SystemIdentifier, decode};
use crate::state::{Action, SessionState, handle};
use crate::transport::{ChannelError, HdpChannel};
use crate::writer::{FrameWriter, WriteQueue};

/// Driver tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Maximum bytes per read.
    pub read_buffer_size: usize,
    /// Settling delay before a deferred MDS attribute request is written.
    pub settle_delay_ms: u64,
    /// Writer queue depth.
    pub write_queue_depth: usize,
    /// End the session once the release response has been queued.
    pub close_on_release: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
            close_on_release: false,
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DriverConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// What a finished session left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub state: SessionState,
    pub reason: CloseReason,
    pub measurements: Vec<Measurement>,
}

/// Channel driver - runs the read loop and the writer for one channel.
pub struct ChannelDriver<C: HdpChannel, O: HdpObserver> {
    channel: Arc<C>,
    observer: Arc<O>,
    system_id: SystemIdentifier,
    config: DriverConfig,
}

impl<C: HdpChannel + 'static> ChannelDriver<C, TracingObserver> {
    /// Create a driver with the default tracing observer.
    pub fn new(channel: Arc<C>, system_id: SystemIdentifier) -> Self {
        Self::with_observer(channel, system_id, Arc::new(TracingObserver))
    }
}

impl<C: HdpChannel + 'static, O: HdpObserver + 'static> ChannelDriver<C, O> {
    /// Create a driver with a custom observer.
    pub fn with_observer(channel: Arc<C>, system_id: SystemIdentifier, observer: Arc<O>) -> Self {
        Self {
            channel,
            observer,
            system_id,
            config: DriverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the writer and read threads.
    pub fn spawn(self) -> Result<DriverHandle<C>> {
        let (queue, commands) = WriteQueue::bounded(self.config.write_queue_depth);
        let writer = FrameWriter::new(
            Arc::clone(&self.channel),
            Arc::clone(&self.observer),
            commands,
        );
        let writer_thread = thread::Builder::new()
            .name("hdp-writer".into())
            .spawn(move || writer.run())?;

        let local_close = Arc::new(AtomicBool::new(false));
        let read_loop = ReadLoop {
            channel: Arc::clone(&self.channel),
            observer: self.observer,
            system_id: self.system_id,
            config: self.config,
            queue: queue.clone(),
            local_close: Arc::clone(&local_close),
        };
        let reader_thread = thread::Builder::new()
            .name("hdp-reader".into())
            .spawn(move || read_loop.run(writer_thread))?;

        Ok(DriverHandle {
            channel: self.channel,
            queue,
            local_close,
            thread: reader_thread,
        })
    }

    /// Run the session to completion on background threads and wait for it.
    pub fn run(self) -> Result<SessionSummary> {
        self.spawn()?.join()
    }
}

/// Control handle of a running driver.
pub struct DriverHandle<C: HdpChannel> {
    channel: Arc<C>,
    queue: WriteQueue,
    local_close: Arc<AtomicBool>,
    thread: JoinHandle<SessionSummary>,
}

impl<C: HdpChannel> DriverHandle<C> {
    /// Close the channel. Safe to call repeatedly and after the session ended.
    pub fn close(&self) -> Result<(), ChannelError> {
        if self.channel.is_open() {
            self.local_close.store(true, Ordering::SeqCst);
        }
        self.channel.close()
    }

    /// Ask the device to release the association.
    pub fn request_release(&self) -> Result<(), ChannelError> {
        self.queue.send(OutboundFrame::ReleaseRequest)
    }

    /// Send an abort and close the channel once it is written.
    pub fn abort(&self) -> Result<(), ChannelError> {
        self.local_close.store(true, Ordering::SeqCst);
        match self.queue.send_and_close(OutboundFrame::Abort) {
            Ok(()) => Ok(()),
            // Writer already gone; nothing can be sent any more.
            Err(_) => self.channel.close(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the session to end.
    pub fn join(self) -> Result<SessionSummary> {
        self.thread
            .join()
            .map_err(|_| anyhow!("Read loop panicked"))
    }
}

/// Read side of a session. Sole owner of the session state.
struct ReadLoop<C: HdpChannel, O: HdpObserver> {
    channel: Arc<C>,
    observer: Arc<O>,
    system_id: SystemIdentifier,
    config: DriverConfig,
    queue: WriteQueue,
    local_close: Arc<AtomicBool>,
}

impl<C: HdpChannel, O: HdpObserver> ReadLoop<C, O> {
    fn emit(&self, event: HdpEvent) {
        self.observer.on_event(&event);
    }

    #[instrument(skip_all, fields(system_id = %self.system_id))]
    fn run(self, writer: JoinHandle<Result<(), ChannelError>>) -> SessionSummary {
        info!("Session started");
        let mut state = SessionState::Idle;
        let mut measurements = Vec::new();

        let read_outcome = self.read_frames(&mut state, &mut measurements);

        // Cancels a deferred write that has not fired yet.
        if self.queue.shutdown().is_err() {
            debug!("Writer already stopped");
        }
        let writer_result = writer
            .join()
            .unwrap_or_else(|_| Err(ChannelError::WriteFailed("writer thread panicked".into())));

        if let Err(e) = self.channel.close() {
            warn!(error = %e, "Channel close failed");
        }

        let reason = if self.local_close.load(Ordering::SeqCst) {
            CloseReason::Local
        } else if let Err(e) = writer_result {
            CloseReason::WriteFailed(match e {
                ChannelError::WriteFailed(message) => message,
                other => other.to_string(),
            })
        } else {
            read_outcome
        };

        info!(state = %state, reason = %reason, measurements = measurements.len(), "Session ended");
        self.emit(HdpEvent::ChannelClosed {
            reason: reason.clone(),
        });

        SessionSummary {
            state,
            reason,
            measurements,
        }
    }

    fn read_frames(
        &self,
        state: &mut SessionState,
        measurements: &mut Vec<Measurement>,
    ) -> CloseReason {
        let max_len = self.config.read_buffer_size.max(HEADER_SIZE);
        loop {
            let chunk = match self.channel.read(max_len) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return CloseReason::EndOfStream,
                Err(e) => {
                    warn!(error = %e, "Read failed");
                    return CloseReason::ReadFailed(match e {
                        ChannelError::ReadFailed(message) => message,
                        other => other.to_string(),
                    });
                }
            };

            if let Err(e) = self.process_chunk(&chunk, state, measurements) {
                // Writer is gone; its own result explains why.
                return CloseReason::WriteFailed(e.to_string());
            }

            if *state == SessionState::Released && self.config.close_on_release {
                info!("Association released, ending session");
                return CloseReason::Local;
            }
        }
    }

    /// Classify one chunk, run the transition and queue its output.
    ///
    /// Each read is classified on its own: there is no buffering across reads,
    /// so a frame split over two reads shows up as a desynchronized chunk.
    fn process_chunk(
        &self,
        chunk: &[u8],
        state: &mut SessionState,
        measurements: &mut Vec<Measurement>,
    ) -> Result<(), ChannelError> {
        if chunk.first().is_none_or(|&b| b == 0x00) {
            trace!(len = chunk.len(), "Ignoring chunk with zero lead byte");
            return Ok(());
        }
        trace!(len = chunk.len(), bytes = %to_hex(chunk), "Chunk received");

        let frame = match decode(chunk) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable chunk");
                self.emit(HdpEvent::Desynchronized {
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        let trailing = &chunk[frame.encoded_len()..];
        if trailing.iter().any(|&b| b != 0x00) {
            let reason = format!(
                "{} trailing bytes after {} frame",
                trailing.len(),
                frame.frame_type()
            );
            warn!(reason = %reason, "Chunk holds more than one frame");
            self.emit(HdpEvent::Desynchronized { reason });
        }

        debug!(frame = %frame, "Frame received");
        self.emit(HdpEvent::Packet {
            direction: PacketDirection::Rx,
            frame_type: frame.frame_type(),
            length: frame.encoded_len(),
        });

        // The peer has moved on, so a deferred request goes out before any
        // reply to this frame.
        self.queue.flush()?;

        let transition = handle(*state, &frame, &self.system_id);
        match transition.action {
            Action::None => {}
            Action::Reply(out) => self.queue.send(out)?,
            Action::Defer(out) => self.queue.schedule(out, self.config.settle_delay())?,
        }

        if let Action::Reply(OutboundFrame::AssociationResponse(system_id)) = transition.action {
            self.emit(HdpEvent::AssociationEstablished { system_id });
        }
        if transition.state != *state {
            self.emit(HdpEvent::StateChanged {
                from: *state,
                to: transition.state,
            });
        }
        if let Some(measurement) = transition.measurement {
            self.emit(HdpEvent::MeasurementReceived(measurement.clone()));
            measurements.push(measurement);
        }
        *state = transition.state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::InvokeId;
    use crate::transport::MockChannel;
    use std::sync::Mutex;
    use std::time::Instant;

    const SYS_ID: SystemIdentifier =
        SystemIdentifier::new([0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF]);

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<HdpEvent>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<HdpEvent> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, pred: impl Fn(&HdpEvent) -> bool) -> usize {
            self.events().iter().filter(|e| pred(e)).count()
        }
    }

    impl HdpObserver for RecordingObserver {
        fn on_event(&self, event: &HdpEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn fast_config() -> DriverConfig {
        DriverConfig {
            settle_delay_ms: 20,
            ..Default::default()
        }
    }

    fn start(
        config: DriverConfig,
    ) -> (
        Arc<MockChannel>,
        Arc<RecordingObserver>,
        DriverHandle<MockChannel>,
    ) {
        let channel = Arc::new(MockChannel::new());
        let observer = Arc::new(RecordingObserver::default());
        let handle =
            ChannelDriver::with_observer(Arc::clone(&channel), SYS_ID, Arc::clone(&observer))
                .with_config(config)
                .spawn()
                .unwrap();
        (channel, observer, handle)
    }

    fn data_export(marker: [u8; 2]) -> Vec<u8> {
        let mut bytes = vec![0u8; 64];
        bytes[0] = 0xE7;
        bytes[3] = 60;
        bytes[6] = 0x4A;
        bytes[7] = 0x05;
        bytes[18] = marker[0];
        bytes[19] = marker[1];
        bytes[45] = 0x78;
        bytes[47] = 0x50;
        bytes[63] = 0x48;
        bytes[50] = 0x20;
        bytes[51] = 0x24;
        bytes[52] = 0x06;
        bytes[53] = 0x0F;
        bytes[54] = 0x0C;
        bytes[55] = 0x1E;
        bytes
    }

    #[test]
    fn test_association_request() {
        let (channel, observer, handle) = start(fast_config());
        channel.queue_chunk(&[0xE2, 0x00, 0x00, 0x00]);
        channel.queue_end_of_stream();
        let summary = handle.join().unwrap();

        let writes = channel.get_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0][0], 0xE3);
        assert_eq!(&writes[0][30..38], &SYS_ID.bytes());

        assert_eq!(summary.state, SessionState::Associated);
        assert_eq!(summary.reason, CloseReason::EndOfStream);
        assert_eq!(
            observer.count(|e| matches!(e, HdpEvent::AssociationEstablished { system_id } if *system_id == SYS_ID)),
            1
        );
    }

    #[test]
    fn test_fixed_report_is_acknowledged_and_published() {
        let (channel, observer, handle) = start(fast_config());
        channel.queue_chunk(&data_export([0x0D, 0x1F]));
        channel.queue_end_of_stream();
        let summary = handle.join().unwrap();

        let writes = channel.get_writes();
        assert_eq!(
            writes,
            vec![OutboundFrame::DataResponse(InvokeId::new([0x4A, 0x05])).encode()]
        );
        assert_eq!(&writes[0][6..8], &[0x4A, 0x05]);

        assert_eq!(summary.state, SessionState::DataAcked);
        assert_eq!(summary.measurements.len(), 1);
        let m = &summary.measurements[0];
        assert_eq!((m.systolic, m.diastolic, m.pulse), (120, 80, 72));
        assert_eq!(m.year_hex, "2024");
        assert_eq!(m.month_hex, "06");
        assert_eq!(m.day_hex, "0F");
        assert_eq!(m.hour_hex, "0C");
        assert_eq!(m.minute_hex, "1E");
        assert_eq!(
            observer.count(|e| matches!(e, HdpEvent::MeasurementReceived(_))),
            1
        );
    }

    #[test]
    fn test_metadata_export_solicits_mds_after_delay() {
        let (channel, observer, handle) = start(fast_config());
        channel.queue_chunk(&data_export([0x00, 0x00]));

        let writes = channel.wait_for_writes(1, Duration::from_secs(2));
        assert_eq!(writes, vec![OutboundFrame::GetMdsAttributes.encode()]);

        channel.queue_end_of_stream();
        let summary = handle.join().unwrap();
        assert_eq!(summary.state, SessionState::AwaitingMds);
        assert!(summary.measurements.is_empty());
        assert_eq!(channel.get_writes().len(), 1);
        assert_eq!(
            observer.count(|e| matches!(e, HdpEvent::MeasurementReceived(_))),
            0
        );
    }

    #[test]
    fn test_next_frame_releases_deferred_request_in_order() {
        let config = DriverConfig {
            settle_delay_ms: 60_000,
            ..Default::default()
        };
        let (channel, _observer, handle) = start(config);
        channel.queue_chunk(&[0xE2, 0x00, 0x00, 0x00]);
        channel.queue_chunk(&data_export([0x00, 0x00]));
        channel.queue_chunk(&data_export([0x0D, 0x1F]));
        channel.queue_end_of_stream();

        let started = Instant::now();
        let summary = handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(30));

        let types: Vec<u8> = channel.get_writes().iter().map(|w| w[0]).collect();
        assert_eq!(types, vec![0xE3, 0xE7, 0xE7]);
        let writes = channel.get_writes();
        assert_eq!(writes[1], OutboundFrame::GetMdsAttributes.encode());
        assert_eq!(
            writes[2],
            OutboundFrame::DataResponse(InvokeId::new([0x4A, 0x05])).encode()
        );
        assert_eq!(summary.state, SessionState::DataAcked);
    }

    #[test]
    fn test_stream_end_cancels_deferred_request() {
        let config = DriverConfig {
            settle_delay_ms: 60_000,
            ..Default::default()
        };
        let (channel, _observer, handle) = start(config);
        channel.queue_chunk(&data_export([0x00, 0x00]));
        channel.queue_end_of_stream();

        let summary = handle.join().unwrap();
        assert_eq!(summary.state, SessionState::AwaitingMds);
        assert!(channel.get_writes().is_empty());
    }

    #[test]
    fn test_release_request() {
        let (channel, observer, handle) = start(fast_config());
        channel.queue_chunk(&[0xE4, 0x00, 0x00, 0x02, 0x00, 0x00]);
        channel.queue_end_of_stream();
        let summary = handle.join().unwrap();

        assert_eq!(
            channel.get_writes(),
            vec![vec![0xE5, 0x00, 0x00, 0x02, 0x00, 0x00]]
        );
        assert_eq!(summary.state, SessionState::Released);
        assert_eq!(
            observer.count(|e| matches!(
                e,
                HdpEvent::StateChanged {
                    from: SessionState::Idle,
                    to: SessionState::Released
                }
            )),
            1
        );
    }

    #[test]
    fn test_close_on_release_ends_session() {
        let config = DriverConfig {
            close_on_release: true,
            ..fast_config()
        };
        let (channel, _observer, handle) = start(config);
        channel.queue_chunk(&[0xE4, 0x00, 0x00, 0x02, 0x00, 0x00]);

        let summary = handle.join().unwrap();
        assert_eq!(summary.reason, CloseReason::Local);
        assert_eq!(channel.get_writes().len(), 1);
        assert!(!channel.is_open());
    }

    #[test]
    fn test_zero_lead_chunk_is_ignored() {
        let (channel, observer, handle) = start(fast_config());
        channel.queue_chunk(&[0x00, 0xE2, 0x00, 0x00, 0x00, 0xE4, 0x00]);
        channel.queue_end_of_stream();
        let summary = handle.join().unwrap();

        assert!(channel.get_writes().is_empty());
        assert_eq!(summary.state, SessionState::Idle);
        // Only the terminal event.
        assert_eq!(
            observer.events(),
            vec![HdpEvent::ChannelClosed {
                reason: CloseReason::EndOfStream
            }]
        );
    }

    #[test]
    fn test_bad_chunks_are_dropped_and_flagged() {
        let (channel, observer, handle) = start(fast_config());
        // Unknown tag, then a frame cut short.
        channel.queue_chunk(&[0x42, 0x00, 0x00, 0x00]);
        channel.queue_chunk(&[0xE7, 0x00, 0x00, 0x3C, 0x00, 0x10]);
        channel.queue_chunk(&[0xE2, 0x00, 0x00, 0x00]);
        channel.queue_end_of_stream();
        let summary = handle.join().unwrap();

        assert_eq!(
            observer.count(|e| matches!(e, HdpEvent::Desynchronized { .. })),
            2
        );
        // The loop kept going.
        assert_eq!(summary.state, SessionState::Associated);
        assert_eq!(channel.get_writes().len(), 1);
    }

    #[test]
    fn test_concatenated_frames_are_flagged() {
        let (channel, observer, handle) = start(fast_config());
        channel.queue_chunk(&[0xE2, 0x00, 0x00, 0x00, 0xE4, 0x00, 0x00, 0x02, 0x00, 0x00]);
        channel.queue_end_of_stream();
        let summary = handle.join().unwrap();

        assert_eq!(summary.state, SessionState::Associated);
        assert_eq!(
            observer.count(|e| matches!(e, HdpEvent::Desynchronized { .. })),
            1
        );
    }

    #[test]
    fn test_close_twice_after_stream_end() {
        let (channel, observer, handle) = start(fast_config());
        channel.queue_end_of_stream();
        let summary = handle.join().unwrap();
        assert_eq!(summary.reason, CloseReason::EndOfStream);

        channel.close().unwrap();
        channel.close().unwrap();
        assert_eq!(
            observer.count(|e| matches!(e, HdpEvent::ChannelClosed { .. })),
            1
        );
    }

    #[test]
    fn test_handle_close_is_idempotent() {
        let (channel, observer, handle) = start(fast_config());
        channel.queue_chunk(&[0xE2, 0x00, 0x00, 0x00]);
        channel.wait_for_writes(1, Duration::from_secs(2));

        handle.close().unwrap();
        handle.close().unwrap();
        let summary = handle.join().unwrap();

        assert_eq!(summary.reason, CloseReason::Local);
        assert_eq!(
            observer.count(|e| matches!(e, HdpEvent::ChannelClosed { .. })),
            1
        );
    }

    #[test]
    fn test_read_failure_ends_session() {
        let (channel, observer, handle) = start(fast_config());
        channel.queue_read_error("link lost");
        let summary = handle.join().unwrap();

        assert_eq!(summary.reason, CloseReason::ReadFailed("link lost".into()));
        assert!(!channel.is_open());
        assert_eq!(
            observer.events().last(),
            Some(&HdpEvent::ChannelClosed {
                reason: CloseReason::ReadFailed("link lost".into())
            })
        );
    }

    #[test]
    fn test_write_failure_ends_session() {
        let (channel, _observer, handle) = start(fast_config());
        channel.fail_writes(true);
        channel.queue_chunk(&[0xE2, 0x00, 0x00, 0x00]);

        let summary = handle.join().unwrap();
        assert_eq!(
            summary.reason,
            CloseReason::WriteFailed("mock write failure".into())
        );
    }

    #[test]
    fn test_abort_and_release_request() {
        let (channel, _observer, handle) = start(fast_config());
        handle.request_release().unwrap();
        channel.wait_for_writes(1, Duration::from_secs(2));
        handle.abort().unwrap();

        let summary = handle.join().unwrap();
        assert_eq!(summary.reason, CloseReason::Local);
        assert_eq!(
            channel.get_writes(),
            vec![
                OutboundFrame::ReleaseRequest.encode(),
                OutboundFrame::Abort.encode()
            ]
        );
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hdp.toml");
        let config = DriverConfig {
            settle_delay_ms: 150,
            close_on_release: true,
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(DriverConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_config_defaults_fill_missing_keys() {
        let config: DriverConfig = toml::from_str("settle_delay_ms = 100").unwrap();
        assert_eq!(config.settle_delay(), Duration::from_millis(100));
        assert_eq!(config.read_buffer_size, 1000);
        assert!(!config.close_on_release);
    }
}
