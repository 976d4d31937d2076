//! Quiz controller task

use super::Envelope;
use crate::gateway::Gateway;
use crate::state_machine::quiz::transition;
use crate::state_machine::{QuizEffect, QuizEvent, QuizNotice, QuizState, TransitionError};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Owns the quiz state and drives it from incoming events
pub(crate) struct QuizRuntime<G: Gateway + 'static> {
    state: QuizState,
    gateway: Arc<G>,
    event_rx: mpsc::Receiver<Envelope<QuizEvent>>,
    event_tx: mpsc::WeakSender<Envelope<QuizEvent>>,
    state_tx: watch::Sender<QuizState>,
    notice_tx: broadcast::Sender<QuizNotice>,
}

impl<G: Gateway + 'static> QuizRuntime<G> {
    pub fn new(
        gateway: Arc<G>,
        event_rx: mpsc::Receiver<Envelope<QuizEvent>>,
        event_tx: mpsc::WeakSender<Envelope<QuizEvent>>,
        state_tx: watch::Sender<QuizState>,
        notice_tx: broadcast::Sender<QuizNotice>,
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
        tracing::info!("Starting quiz controller");

        while let Some(Envelope { event, reply }) = self.event_rx.recv().await {
            let outcome = self.process_event(event);
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
        }

        tracing::info!("Quiz controller stopped");
    }

    fn process_event(&mut self, event: QuizEvent) -> Result<(), TransitionError> {
        let result = match transition(&self.state, event) {
            Ok(r) => r,
            Err(e) if e.is_stale() => {
                tracing::debug!(error = %e, "Dropping stale quiz response");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Quiz event rejected");
                let _ = self.notice_tx.send(QuizNotice::Rejected {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        self.state = result.new_state;
        for effect in result.effects {
            self.execute_effect(effect);
        }
        Ok(())
    }

    fn execute_effect(&self, effect: QuizEffect) {
        match effect {
            QuizEffect::PublishState => {
                tracing::debug!(
                    generation = %self.state.generation(),
                    can_submit = self.state.can_submit(),
                    "Publishing quiz state"
                );
                self.state_tx.send_replace(self.state.clone());
            }

            QuizEffect::Notify(notice) => {
                let _ = self.notice_tx.send(notice);
            }

            QuizEffect::GenerateQuiz {
                stamp,
                topic,
                document_id,
                count,
            } => {
                let gateway = self.gateway.clone();
                let event_tx = self.event_tx.clone();

                tokio::spawn(async move {
                    tracing::info!(%stamp, %document_id, count, "Generating quiz (background)");
                    let event = match gateway.generate_quiz(&topic, document_id, count).await {
                        Ok(payload) => QuizEvent::QuizGenerated { stamp, payload },
                        Err(error) => QuizEvent::GenerationFailed { stamp, error },
                    };
                    if let Some(tx) = event_tx.upgrade() {
                        let _ = tx.send(Envelope::internal(event)).await;
                    }
                });
            }

            // Grading already happened; this only settles the display status
            QuizEffect::ReportAttempt {
                stamp,
                quiz_id,
                score,
                total,
            } => {
                let gateway = self.gateway.clone();
                let event_tx = self.event_tx.clone();

                tokio::spawn(async move {
                    let result = gateway.report_attempt(quiz_id, score, total).await;
                    if let Err(e) = &result {
                        tracing::warn!(%quiz_id, error = %e, "Attempt report failed");
                    }
                    if let Some(tx) = event_tx.upgrade() {
                        let settled = QuizEvent::ReportSettled {
                            stamp,
                            quiz_id,
                            result,
                        };
                        let _ = tx.send(Envelope::internal(settled)).await;
                    }
                });
            }
        }
    }
}
