use super::ClusterId;
use crate::factors::Factor;
use crate::Result;

/// One direction of an edge of the cluster graph, along which messages are passed.
///
/// The path holds the message the sender would send next and the last message actually sent.
/// Its information gain is the KL-divergence between the two, or the distance of the next
/// message from the vacuous message if nothing has been sent yet.
#[derive(Debug, Clone)]
pub struct MessagePath<F: Factor> {
    sender: ClusterId,
    receiver: ClusterId,
    next_message: F,
    previously_sent_message: Option<F>,
    next_information_gain: f64,
    information_gains_with_iters: Vec<f64>,
}

impl<F: Factor> MessagePath<F> {
    pub(super) fn new(sender: ClusterId, receiver: ClusterId, next_message: F) -> Result<Self> {
        let mut path = Self {
            sender,
            receiver,
            next_message,
            previously_sent_message: None,
            next_information_gain: 0.0,
            information_gains_with_iters: Vec::new(),
        };
        path.update_next_information_gain()?;
        Ok(path)
    }

    pub fn sender(&self) -> ClusterId {
        self.sender
    }
    pub fn receiver(&self) -> ClusterId {
        self.receiver
    }
    pub fn next_message(&self) -> &F {
        &self.next_message
    }
    pub fn previously_sent_message(&self) -> Option<&F> {
        self.previously_sent_message.as_ref()
    }
    pub fn next_information_gain(&self) -> f64 {
        self.next_information_gain
    }
    /// Every value taken by the information gain, one entry per update.
    pub fn information_gains_with_iters(&self) -> &[f64] {
        &self.information_gains_with_iters
    }

    fn update_next_information_gain(&mut self) -> Result<()> {
        // KL(P||Q) is the information gained when Q (the next message) replaces P (the
        // previously sent one).
        self.next_information_gain = match &self.previously_sent_message {
            None => self.next_message.distance_from_vacuous()?,
            Some(previous) => previous.kl_divergence(&self.next_message, true)?,
        };
        self.information_gains_with_iters
            .push(self.next_information_gain);
        Ok(())
    }

    /// Replace the next message after the sender's belief changed.
    pub(super) fn set_next_message(&mut self, message: F) -> Result<()> {
        self.next_message = message;
        self.update_next_information_gain()
    }

    /// Mark the next message as sent and return it.
    ///
    /// The information gain drops to zero until the next message is recomputed.
    pub(super) fn mark_sent(&mut self) -> F {
        self.previously_sent_message = Some(self.next_message.clone());
        self.next_information_gain = 0.0;
        self.information_gains_with_iters.push(0.0);
        self.next_message.clone()
    }
}
