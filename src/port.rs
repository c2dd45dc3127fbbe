//! Ports connecting the component to its neighbours in the pipeline.
//!
//! - Inbound: a unit-typed trigger channel. Each unit is one request for a frame.
//! - Outbound: a [`FrameSink`] receiving every successfully decoded frame.
//!
//! Frames are handed to the sink as borrowed [`FrameView`]s. Their bytes belong to the
//! component's frame buffer, so a sink that keeps a frame beyond the call must copy it,
//! which [`ChannelSink`] does.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError, TrySendError};

use crate::frame::{FrameView, OwnedFrame};

/// Create a connected trigger sender and receiver.
pub fn trigger_channel() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::channel();
    (TriggerSender { tx }, TriggerReceiver { rx })
}

/// Emits trigger units, one per requested frame.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: Sender<()>,
}

impl TriggerSender {
    /// Send one trigger. Returns `false` if the receiving side is gone.
    pub fn fire(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

/// Receiving end of the trigger channel.
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: Receiver<()>,
}

impl TriggerReceiver {
    /// Take one pending trigger unit without blocking.
    pub fn try_take(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                tracing::trace!("trigger channel disconnected");
                false
            }
        }
    }
}

/// Downstream consumer of decoded frames.
pub trait FrameSink {
    /// Receive one frame. The view is only valid for the duration of the call.
    fn publish(&mut self, frame: &FrameView<'_>);
}

impl<F> FrameSink for F
where
    F: FnMut(&FrameView<'_>),
{
    fn publish(&mut self, frame: &FrameView<'_>) {
        self(frame);
    }
}

/// Sink copying each frame into a bounded channel.
///
/// When the receiver falls behind, frames are dropped rather than blocking the grab
/// cycle.
#[derive(Debug)]
pub struct ChannelSink {
    tx: SyncSender<OwnedFrame>,
    dropped: u64,
}

impl ChannelSink {
    /// Create a sink and its receiver with room for `capacity` frames.
    pub fn bounded(capacity: usize) -> (Self, Receiver<OwnedFrame>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (Self { tx, dropped: 0 }, rx)
    }

    /// Frames dropped because the channel was full or closed.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn publish(&mut self, frame: &FrameView<'_>) {
        match self.tx.try_send(frame.to_owned_frame()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::debug!(frame_count = frame.frame_count(), "output channel full, frame dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                tracing::trace!("output channel disconnected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameDescriptor;
    use crate::traits::{FrameInfo, FrameStatus, PixelFormat};

    fn mono_frame(frame_count: u64) -> FrameDescriptor {
        let mut frame = FrameDescriptor::allocate(4);
        frame.record(&FrameInfo {
            width: 2,
            height: 2,
            format: PixelFormat::Mono8,
            populated: 4,
            frame_count,
            status: FrameStatus::Complete,
        });
        frame
    }

    #[test]
    fn test_trigger_units_are_taken_once() {
        let (tx, rx) = trigger_channel();
        assert!(!rx.try_take());

        assert!(tx.fire());
        assert!(tx.fire());
        assert!(rx.try_take());
        assert!(rx.try_take());
        assert!(!rx.try_take());
    }

    #[test]
    fn test_fire_after_receiver_dropped() {
        let (tx, rx) = trigger_channel();
        drop(rx);
        assert!(!tx.fire());
    }

    #[test]
    fn test_closure_sink() {
        let frame = mono_frame(9);
        let view = FrameView::decode(&frame).expect("decode");

        let mut seen = Vec::new();
        let mut sink = |f: &FrameView<'_>| seen.push(f.frame_count());
        sink.publish(&view);
        assert_eq!(seen, vec![9]);
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (mut sink, rx) = ChannelSink::bounded(1);

        for n in 0..3 {
            let frame = mono_frame(n);
            let view = FrameView::decode(&frame).expect("decode");
            sink.publish(&view);
        }

        assert_eq!(sink.dropped(), 2);
        let received = rx.try_recv().expect("one frame queued");
        assert_eq!(received.frame_count, 0);
        assert_eq!(received.image.width(), 2);
    }
}
