//! Serialized frame writer.
//!
//! Every physical write of a channel goes through one writer thread that
//! consumes a bounded command queue, so frames produced by different handling
//! passes can never interleave.
//!
//! ```text
//! read loop ─┐
//!            ├─► SyncSender<WriteCommand> ─► writer thread ─► channel
//! handle ────┘
//! ```
//!
//! A deferred frame is held by the writer until its deadline passes or the
//! read loop flushes it; shutting the writer down cancels it.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::events::{HdpEvent, HdpObserver, PacketDirection};
use crate::protocol::OutboundFrame;
use crate::protocol::hex::to_hex;
use crate::transport::{ChannelError, HdpChannel};

#[derive(Debug)]
pub(crate) enum WriteCommand {
    /// Write now.
    Send(OutboundFrame),
    /// Write once `delay` has elapsed, unless flushed or cancelled first.
    Schedule {
        frame: OutboundFrame,
        delay: Duration,
    },
    /// Write the deferred frame now, if any.
    Flush,
    /// Drop the deferred frame, write this one, close the channel and stop.
    SendAndClose(OutboundFrame),
    /// Drop the deferred frame and stop.
    Shutdown,
}

/// Sending side of the writer queue.
#[derive(Clone)]
pub(crate) struct WriteQueue {
    sender: SyncSender<WriteCommand>,
}

impl WriteQueue {
    pub(crate) fn bounded(depth: usize) -> (Self, Receiver<WriteCommand>) {
        let (sender, receiver) = mpsc::sync_channel(depth.max(1));
        (Self { sender }, receiver)
    }

    fn push(&self, command: WriteCommand) -> Result<(), ChannelError> {
        self.sender.send(command).map_err(|_| ChannelError::Closed)
    }

    pub(crate) fn send(&self, frame: OutboundFrame) -> Result<(), ChannelError> {
        self.push(WriteCommand::Send(frame))
    }

    pub(crate) fn schedule(&self, frame: OutboundFrame, delay: Duration) -> Result<(), ChannelError> {
        self.push(WriteCommand::Schedule { frame, delay })
    }

    pub(crate) fn flush(&self) -> Result<(), ChannelError> {
        self.push(WriteCommand::Flush)
    }

    pub(crate) fn send_and_close(&self, frame: OutboundFrame) -> Result<(), ChannelError> {
        self.push(WriteCommand::SendAndClose(frame))
    }

    pub(crate) fn shutdown(&self) -> Result<(), ChannelError> {
        self.push(WriteCommand::Shutdown)
    }
}

struct Pending {
    frame: OutboundFrame,
    deadline: Instant,
}

/// Writer thread state. Sole caller of `HdpChannel::write` for its channel.
pub(crate) struct FrameWriter<C: HdpChannel, O: HdpObserver> {
    channel: Arc<C>,
    observer: Arc<O>,
    commands: Receiver<WriteCommand>,
    pending: Option<Pending>,
}

impl<C: HdpChannel, O: HdpObserver> FrameWriter<C, O> {
    pub(crate) fn new(channel: Arc<C>, observer: Arc<O>, commands: Receiver<WriteCommand>) -> Self {
        Self {
            channel,
            observer,
            commands,
            pending: None,
        }
    }

    /// Process commands until shutdown.
    ///
    /// On a write failure the channel is closed so the read loop unblocks.
    pub(crate) fn run(mut self) -> Result<(), ChannelError> {
        let result = self.process();
        if let Some(pending) = self.pending.take() {
            debug!(frame = %pending.frame, "Cancelled deferred write");
        }
        if let Err(e) = &result {
            warn!(error = %e, "Writer stopped");
            if let Err(close_err) = self.channel.close() {
                warn!(error = %close_err, "Close after write failure failed");
            }
        }
        result
    }

    fn process(&mut self) -> Result<(), ChannelError> {
        while let Some(command) = self.next_command()? {
            match command {
                WriteCommand::Send(frame) => self.write(&frame)?,
                WriteCommand::Schedule { frame, delay } => {
                    // Never drop an earlier deferred frame silently.
                    self.flush_pending()?;
                    debug!(frame = %frame, delay_ms = delay.as_millis() as u64, "Deferred write scheduled");
                    self.pending = Some(Pending {
                        frame,
                        deadline: Instant::now() + delay,
                    });
                }
                WriteCommand::Flush => self.flush_pending()?,
                WriteCommand::SendAndClose(frame) => {
                    self.pending = None;
                    self.write(&frame)?;
                    self.channel.close()?;
                    return Ok(());
                }
                WriteCommand::Shutdown => return Ok(()),
            }
        }
        Ok(())
    }

    /// Wait for the next command, writing the deferred frame when its
    /// deadline passes first. `None` once every sender is gone.
    fn next_command(&mut self) -> Result<Option<WriteCommand>, ChannelError> {
        loop {
            let Some(deadline) = self.pending.as_ref().map(|p| p.deadline) else {
                return Ok(self.commands.recv().ok());
            };
            let now = Instant::now();
            if now >= deadline {
                self.flush_pending()?;
                continue;
            }
            match self.commands.recv_timeout(deadline - now) {
                Ok(command) => return Ok(Some(command)),
                Err(RecvTimeoutError::Timeout) => self.flush_pending()?,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    fn flush_pending(&mut self) -> Result<(), ChannelError> {
        match self.pending.take() {
            Some(pending) => self.write(&pending.frame),
            None => Ok(()),
        }
    }

    fn write(&self, frame: &OutboundFrame) -> Result<(), ChannelError> {
        let bytes = frame.encode();
        debug!(frame = %frame, bytes = %to_hex(&bytes), "Writing frame");
        self.channel.write(&bytes)?;
        self.observer.on_event(&HdpEvent::Packet {
            direction: PacketDirection::Tx,
            frame_type: frame.frame_type(),
            length: bytes.len(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::protocol::InvokeId;
    use crate::transport::MockChannel;
    use std::thread;

    fn start(
        channel: &Arc<MockChannel>,
    ) -> (WriteQueue, thread::JoinHandle<Result<(), ChannelError>>) {
        let (queue, rx) = WriteQueue::bounded(8);
        let writer = FrameWriter::new(Arc::clone(channel), Arc::new(NullObserver), rx);
        (queue, thread::spawn(move || writer.run()))
    }

    #[test]
    fn test_writes_in_queue_order() {
        let channel = Arc::new(MockChannel::new());
        let (queue, handle) = start(&channel);

        queue.send(OutboundFrame::ReleaseRequest).unwrap();
        queue
            .send(OutboundFrame::DataResponse(InvokeId::new([0, 1])))
            .unwrap();
        queue.shutdown().unwrap();
        handle.join().unwrap().unwrap();

        let writes = channel.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0][0], 0xE4);
        assert_eq!(writes[1][0], 0xE7);
    }

    #[test]
    fn test_deferred_write_fires_after_delay() {
        let channel = Arc::new(MockChannel::new());
        let (queue, handle) = start(&channel);

        let start = Instant::now();
        queue
            .schedule(OutboundFrame::GetMdsAttributes, Duration::from_millis(30))
            .unwrap();
        let writes = channel.wait_for_writes(1, Duration::from_secs(2));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(writes, vec![OutboundFrame::GetMdsAttributes.encode()]);

        queue.shutdown().unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_flush_writes_deferred_frame_first() {
        let channel = Arc::new(MockChannel::new());
        let (queue, handle) = start(&channel);

        queue
            .schedule(OutboundFrame::GetMdsAttributes, Duration::from_secs(60))
            .unwrap();
        queue.flush().unwrap();
        queue.send(OutboundFrame::ReleaseResponse).unwrap();
        queue.shutdown().unwrap();
        handle.join().unwrap().unwrap();

        assert_eq!(
            channel.get_writes(),
            vec![
                OutboundFrame::GetMdsAttributes.encode(),
                OutboundFrame::ReleaseResponse.encode()
            ]
        );
    }

    #[test]
    fn test_shutdown_cancels_deferred_frame() {
        let channel = Arc::new(MockChannel::new());
        let (queue, handle) = start(&channel);

        queue
            .schedule(OutboundFrame::GetMdsAttributes, Duration::from_secs(60))
            .unwrap();
        queue.shutdown().unwrap();
        handle.join().unwrap().unwrap();

        assert!(channel.get_writes().is_empty());
    }

    #[test]
    fn test_send_and_close() {
        let channel = Arc::new(MockChannel::new());
        let (queue, handle) = start(&channel);

        queue
            .schedule(OutboundFrame::GetMdsAttributes, Duration::from_secs(60))
            .unwrap();
        queue.send_and_close(OutboundFrame::Abort).unwrap();
        handle.join().unwrap().unwrap();

        assert_eq!(channel.get_writes(), vec![OutboundFrame::Abort.encode()]);
        assert!(!channel.is_open());
        // Writer is gone.
        assert!(queue.send(OutboundFrame::ReleaseRequest).is_err());
    }

    #[test]
    fn test_write_failure_closes_channel() {
        let channel = Arc::new(MockChannel::new());
        channel.fail_writes(true);
        let (queue, handle) = start(&channel);

        queue.send(OutboundFrame::ReleaseResponse).unwrap();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(ChannelError::WriteFailed(_))));
        assert!(!channel.is_open());
    }
}
