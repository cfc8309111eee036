use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Producer half of a [`ChannelTransport`]: raw wire frames, in order.
pub type FrameSender = mpsc::UnboundedSender<String>;
/// Fires once when the consuming side closes or drops its transport.
pub type CancelSignal = oneshot::Receiver<()>;

/// Persistent push connection exclusively owned by one exchange.
pub trait FrameTransport: Send {
    /// Next raw frame, or `None` once the connection is gone.
    fn recv(&mut self) -> BoxFuture<'_, Option<String>>;
    /// Asks the producer to stop. Returns true if the signal was delivered.
    fn close(&mut self) -> bool;
    fn is_closed(&self) -> bool;
}

pub struct ChannelTransport {
    frames: mpsc::UnboundedReceiver<String>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl ChannelTransport {
    pub(crate) fn new(
        frames: mpsc::UnboundedReceiver<String>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            frames,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }
}

impl FrameTransport for ChannelTransport {
    fn recv(&mut self) -> BoxFuture<'_, Option<String>> {
        Box::pin(self.frames.recv())
    }

    fn close(&mut self) -> bool {
        // Buffered frames stay readable; the producer just can't add more.
        self.frames.close();
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    fn is_closed(&self) -> bool {
        self.cancel_tx.is_none()
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub fn channel_transport() -> (FrameSender, ChannelTransport, CancelSignal) {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (frame_tx, ChannelTransport::new(frame_rx, cancel_tx), cancel_rx)
}
