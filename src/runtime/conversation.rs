//! Conversation controller task

use super::Envelope;
use crate::gateway::Gateway;
use crate::state_machine::conversation::transition;
use crate::state_machine::{
    ConversationEffect, ConversationEvent, ConversationNotice, ConversationState, TransitionError,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Owns the conversation state and drives it from incoming events
pub(crate) struct ConversationRuntime<G: Gateway + 'static> {
    state: ConversationState,
    gateway: Arc<G>,
    event_rx: mpsc::Receiver<Envelope<ConversationEvent>>,
    /// Weak so that in-flight calls do not keep the controller alive
    event_tx: mpsc::WeakSender<Envelope<ConversationEvent>>,
    state_tx: watch::Sender<ConversationState>,
    notice_tx: broadcast::Sender<ConversationNotice>,
}

impl<G: Gateway + 'static> ConversationRuntime<G> {
    pub fn new(
        gateway: Arc<G>,
        event_rx: mpsc::Receiver<Envelope<ConversationEvent>>,
        event_tx: mpsc::WeakSender<Envelope<ConversationEvent>>,
        state_tx: watch::Sender<ConversationState>,
        notice_tx: broadcast::Sender<ConversationNotice>,
    ) -> Self {
        let state = state_tx.borrow().clone();
        Self {
            state,
            gateway,
            event_rx,
            event_tx,
            state_tx,
            notice_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Starting conversation controller");

        while let Some(Envelope { event, reply }) = self.event_rx.recv().await {
            let outcome = self.process_event(event);
            if let Some(reply) = reply {
                // Caller may have stopped waiting
                let _ = reply.send(outcome);
            }
        }

        tracing::info!("Conversation controller stopped");
    }

    /// Apply one event and run its effects before returning
    fn process_event(&mut self, event: ConversationEvent) -> Result<(), TransitionError> {
        let result = match transition(&self.state, event) {
            Ok(r) => r,
            Err(e) if e.is_stale() => {
                tracing::debug!(error = %e, "Dropping stale conversation response");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Conversation event rejected");
                let _ = self.notice_tx.send(ConversationNotice::Rejected {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        if result.new_state.phase() != self.state.phase() {
            tracing::debug!(
                from = ?self.state.phase(),
                to = ?result.new_state.phase(),
                generation = %result.new_state.generation(),
                "Conversation transition"
            );
        }
        self.state = result.new_state;

        for effect in result.effects {
            self.execute_effect(effect);
        }
        Ok(())
    }

    fn execute_effect(&self, effect: ConversationEffect) {
        match effect {
            ConversationEffect::PublishState => {
                self.state_tx.send_replace(self.state.clone());
            }

            ConversationEffect::Notify(notice) => {
                // No subscribers is fine
                let _ = self.notice_tx.send(notice);
            }

            ConversationEffect::Ask { stamp, question } => {
                let gateway = self.gateway.clone();
                let event_tx = self.event_tx.clone();

                tokio::spawn(async move {
                    tracing::info!(%stamp, "Asking study assistant (background)");
                    let event = match gateway.ask(&question).await {
                        Ok(response) => ConversationEvent::AnswerReceived { stamp, response },
                        Err(error) => ConversationEvent::AskFailed { stamp, error },
                    };
                    match event_tx.upgrade() {
                        Some(tx) => {
                            let _ = tx.send(Envelope::internal(event)).await;
                        }
                        None => tracing::debug!(%stamp, "Controller gone, dropping answer"),
                    }
                });
            }
        }
    }
}
