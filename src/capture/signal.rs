use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use image::RgbaImage;

/// Latest decoded frame, written by a decoder thread and read by ticks.
#[derive(Clone, Default)]
pub struct FrameSlot {
    latest: Arc<Mutex<Option<RgbaImage>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: RgbaImage) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    pub fn latest(&self) -> Option<RgbaImage> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|f| f.dimensions())
            .unwrap_or((0, 0))
    }
}

/// Create a connected notifier/signal pair.
///
/// The channel holds at most one pending pulse, so a slow consumer sees one
/// wake-up for any burst of decoded frames.
pub fn frame_signal() -> (FrameNotifier, FrameSignal) {
    let (tx, rx) = mpsc::sync_channel(1);
    (FrameNotifier { tx }, FrameSignal { rx })
}

/// Decoder side of a frame-availability signal.
#[derive(Clone)]
pub struct FrameNotifier {
    tx: SyncSender<()>,
}

impl FrameNotifier {
    /// Pulse once for a newly decoded frame. Returns `false` once the
    /// receiving side is gone.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalWait {
    Frame,
    Timeout,
    Closed,
}

/// Consumer side of a frame-availability signal.
pub struct FrameSignal {
    rx: Receiver<()>,
}

impl FrameSignal {
    /// Wait until the next frame is available or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> SignalWait {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => SignalWait::Frame,
            Err(RecvTimeoutError::Timeout) => SignalWait::Timeout,
            Err(RecvTimeoutError::Disconnected) => SignalWait::Closed,
        }
    }
}
