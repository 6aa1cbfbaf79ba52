//! Message channel between the control surface and a page.
//!
//! [`ControlChannel`] is one delivery attempt: send an envelope, wait for
//! the reply. [`local_channel`] pairs an in-process sender with the
//! [`Delivery`] receiver a [`crate::PageEndpoint`] serves.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::command::{ControlEnvelope, ControlReply};
use crate::errors::DeliveryError;

/// One-shot request/reply transport to a page.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Deliver `envelope` and wait for the page's reply.
    async fn deliver(&self, envelope: &ControlEnvelope) -> Result<ControlReply, DeliveryError>;
}

/// A delivered envelope awaiting its reply.
#[derive(Debug)]
pub struct Delivery {
    /// The request.
    pub envelope: ControlEnvelope,
    reply: oneshot::Sender<ControlReply>,
}

impl Delivery {
    /// Answer the request. A requester that gave up is ignored.
    pub fn respond(self, reply: ControlReply) {
        let _ = self.reply.send(reply);
    }
}

/// In-process [`ControlChannel`] with a per-delivery timeout.
#[derive(Clone, Debug)]
pub struct LocalChannel {
    tx: mpsc::Sender<Delivery>,
    timeout: Duration,
}

/// Create a connected channel pair.
pub fn local_channel(capacity: usize, timeout: Duration) -> (LocalChannel, mpsc::Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (LocalChannel { tx, timeout }, rx)
}

#[async_trait]
impl ControlChannel for LocalChannel {
    async fn deliver(&self, envelope: &ControlEnvelope) -> Result<ControlReply, DeliveryError> {
        let (reply, rx) = oneshot::channel();
        let delivery = Delivery {
            envelope: envelope.clone(),
            reply,
        };
        let exchange = async {
            self.tx
                .send(delivery)
                .await
                .map_err(|_| DeliveryError::Disconnected)?;
            rx.await
                .map_err(|_| DeliveryError::Failed("page dropped the request".into()))
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))?
    }
}
