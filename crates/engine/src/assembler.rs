//! Drives one exchange from its first frame to a terminal state.

use std::time::Duration;

use tokio::time::Instant;

use crate::citation::decode_metadata_frame;
use crate::exchange::{Exchange, ExchangeFailure, ExchangeState};
use crate::frame::{Frame, Sentinels};
use crate::settings::EngineSettings;
use crate::transport::FrameTransport;

pub const DEFAULT_NO_DATA_TIMEOUT: Duration = Duration::from_secs(60);

type Observer = Box<dyn FnMut(&Exchange) + Send>;

/// What applying one input did to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Appended,
    AwaitingMetadata,
    Completed,
    Failed,
    /// Arrived after a terminal state, or had no meaning in the current one.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerOptions {
    pub sentinels: Sentinels,
    pub no_data_timeout: Duration,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            sentinels: Sentinels::default(),
            no_data_timeout: DEFAULT_NO_DATA_TIMEOUT,
        }
    }
}

impl From<&EngineSettings> for AssemblerOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            sentinels: settings.sentinels.clone(),
            no_data_timeout: settings.stream.no_data_timeout(),
        }
    }
}

/// Owns one [`Exchange`] and the transport feeding it.
///
/// Never performs blocking work; [`Self::run`] only awaits the transport and
/// the no-data deadline.
pub struct TranscriptAssembler {
    exchange: Exchange,
    transport: Box<dyn FrameTransport>,
    sentinels: Sentinels,
    no_data_deadline: Instant,
    observers: Vec<Observer>,
}

impl TranscriptAssembler {
    /// Starts the no-data deadline immediately.
    pub fn new(
        exchange: Exchange,
        transport: Box<dyn FrameTransport>,
        options: AssemblerOptions,
    ) -> Self {
        Self {
            exchange,
            transport,
            sentinels: options.sentinels,
            no_data_deadline: Instant::now() + options.no_data_timeout,
            observers: Vec::new(),
        }
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn no_data_deadline(&self) -> Instant {
        self.no_data_deadline
    }

    /// Registers a callback invoked after every change to the exchange.
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: FnMut(&Exchange) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub fn apply_frame(&mut self, raw: &str) -> Disposition {
        let frame = self.sentinels.classify(raw);
        self.apply(frame)
    }

    pub fn apply(&mut self, frame: Frame) -> Disposition {
        match (self.exchange.state, frame) {
            (ExchangeState::Complete | ExchangeState::Failed, _) => {
                tracing::trace!(exchange_id = %self.exchange.id, "ignoring frame after terminal state");
                Disposition::Ignored
            }
            (ExchangeState::Streaming | ExchangeState::AwaitingMetadata, Frame::Error(message)) => {
                tracing::warn!(
                    exchange_id = %self.exchange.id,
                    error = %message,
                    collected_len = self.exchange.assistant_text.len(),
                    "upstream signaled an error"
                );
                self.fail(ExchangeFailure::upstream(message))
            }
            (ExchangeState::Streaming, Frame::Content(delta)) => {
                self.exchange.assistant_text.push_str(&delta);
                self.publish();
                Disposition::Appended
            }
            (ExchangeState::Streaming, Frame::EndOfContent) => {
                self.exchange.state = ExchangeState::AwaitingMetadata;
                self.publish();
                Disposition::AwaitingMetadata
            }
            (ExchangeState::AwaitingMetadata, Frame::Content(raw)) => {
                self.exchange.citations = match decode_metadata_frame(&raw) {
                    Ok(citations) => citations,
                    Err(error) => {
                        tracing::warn!(
                            exchange_id = %self.exchange.id,
                            error = %error,
                            "citation metadata frame could not be decoded; completing without sources"
                        );
                        Vec::new()
                    }
                };
                self.complete()
            }
            (ExchangeState::AwaitingMetadata, Frame::EndOfContent) => {
                tracing::debug!(exchange_id = %self.exchange.id, "duplicate end-of-content marker");
                Disposition::Ignored
            }
        }
    }

    /// Fails the exchange if the no-data deadline passed with nothing collected.
    pub fn check_deadline(&mut self, now: Instant) -> Disposition {
        if !self.exchange.is_live()
            || !self.exchange.assistant_text.is_empty()
            || now < self.no_data_deadline
        {
            return Disposition::Ignored;
        }

        tracing::warn!(
            exchange_id = %self.exchange.id,
            state = ?self.exchange.state,
            "no content received before the deadline"
        );
        self.fail(ExchangeFailure::timeout(
            "no content received before the deadline",
        ))
    }

    /// Handles the transport ending on its own.
    pub fn transport_closed(&mut self) -> Disposition {
        match self.exchange.state {
            ExchangeState::Streaming => {
                tracing::warn!(
                    exchange_id = %self.exchange.id,
                    collected_len = self.exchange.assistant_text.len(),
                    "transport closed before end of content"
                );
                self.fail(ExchangeFailure::upstream(
                    "connection closed before end of content",
                ))
            }
            ExchangeState::AwaitingMetadata => {
                tracing::warn!(
                    exchange_id = %self.exchange.id,
                    "transport closed before citation metadata; completing without sources"
                );
                self.complete()
            }
            ExchangeState::Complete | ExchangeState::Failed => Disposition::Ignored,
        }
    }

    /// Pumps frames until the exchange is terminal.
    pub async fn run(&mut self) -> &Exchange {
        while self.exchange.is_live() {
            let waiting_for_data = self.exchange.assistant_text.is_empty();
            let deadline = self.no_data_deadline;

            let next = tokio::select! {
                frame = self.transport.recv() => Some(frame),
                _ = tokio::time::sleep_until(deadline), if waiting_for_data => None,
            };

            match next {
                Some(Some(raw)) => {
                    self.apply_frame(&raw);
                }
                Some(None) => {
                    self.transport_closed();
                }
                None => {
                    self.check_deadline(Instant::now());
                }
            }
        }

        &self.exchange
    }

    /// Hands back the finished exchange and the transport for the caller to close or reuse.
    pub fn into_parts(self) -> (Exchange, Box<dyn FrameTransport>) {
        (self.exchange, self.transport)
    }

    fn complete(&mut self) -> Disposition {
        self.exchange.state = ExchangeState::Complete;
        tracing::debug!(
            exchange_id = %self.exchange.id,
            text_len = self.exchange.assistant_text.len(),
            citation_count = self.exchange.citations.len(),
            "exchange complete"
        );
        self.publish();
        Disposition::Completed
    }

    fn fail(&mut self, failure: ExchangeFailure) -> Disposition {
        self.exchange.state = ExchangeState::Failed;
        self.exchange.failure = Some(failure);
        self.transport.close();
        self.publish();
        Disposition::Failed
    }

    fn publish(&mut self) {
        for observer in &mut self.observers {
            observer(&self.exchange);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::exchange::{FailureKind, UPSTREAM_FALLBACK_MESSAGE};
    use crate::frame::{DEFAULT_END_OF_CONTENT, DEFAULT_ERROR_PREFIX};
    use crate::ids::ExchangeId;
    use crate::transport::{CancelSignal, FrameSender, channel_transport};

    fn assembler() -> (TranscriptAssembler, FrameSender, CancelSignal) {
        let (tx, transport, cancel) = channel_transport();
        let assembler = TranscriptAssembler::new(
            Exchange::new(ExchangeId::new_v7(), "What grants fit a rural clinic?"),
            Box::new(transport),
            AssemblerOptions::default(),
        );
        (assembler, tx, cancel)
    }

    #[test]
    fn content_end_and_metadata_complete_the_exchange() {
        let (mut assembler, _tx, _cancel) = assembler();

        assert_eq!(assembler.apply_frame("a"), Disposition::Appended);
        assert_eq!(assembler.apply_frame("b"), Disposition::Appended);
        assert_eq!(
            assembler.apply_frame(DEFAULT_END_OF_CONTENT),
            Disposition::AwaitingMetadata
        );
        assert_eq!(
            assembler.apply_frame(r#"[{"uri":"http://x/y/z"}]"#),
            Disposition::Completed
        );

        let exchange = assembler.exchange();
        assert_eq!(exchange.state, ExchangeState::Complete);
        assert_eq!(exchange.assistant_text, "ab");
        assert_eq!(exchange.citations.len(), 1);
        assert_eq!(exchange.citations[0].title, "z");
    }

    #[test]
    fn metadata_decode_failure_completes_without_citations() {
        let (mut assembler, _tx, _cancel) = assembler();
        assembler.apply_frame("answer");
        assembler.apply_frame(DEFAULT_END_OF_CONTENT);

        assert_eq!(assembler.apply_frame("not json"), Disposition::Completed);
        assert_eq!(assembler.exchange().assistant_text, "answer");
        assert!(assembler.exchange().citations.is_empty());
        assert!(assembler.exchange().failure.is_none());
    }

    #[tokio::test]
    async fn error_frame_fails_and_closes_transport() {
        let (mut assembler, _tx, cancel) = assembler();
        assembler.apply_frame("partial ");

        let raw = format!("{DEFAULT_ERROR_PREFIX}boom");
        assert_eq!(assembler.apply_frame(&raw), Disposition::Failed);

        let exchange = assembler.exchange();
        assert_eq!(exchange.state, ExchangeState::Failed);
        assert_eq!(exchange.assistant_text, "partial ");
        let failure = exchange.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Upstream);
        assert_eq!(failure.detail, "boom");
        assert_eq!(failure.fallback_message, UPSTREAM_FALLBACK_MESSAGE);
        assert!(cancel.await.is_ok());
    }

    #[test]
    fn frames_after_terminal_state_are_ignored() {
        let (mut assembler, _tx, _cancel) = assembler();
        assembler.apply_frame("done");
        assembler.apply_frame(DEFAULT_END_OF_CONTENT);
        assembler.apply_frame("[]");

        assert_eq!(assembler.apply_frame("trailing"), Disposition::Ignored);
        assert_eq!(
            assembler.apply_frame(&format!("{DEFAULT_ERROR_PREFIX}late")),
            Disposition::Ignored
        );
        assert_eq!(assembler.exchange().assistant_text, "done");
        assert_eq!(assembler.exchange().state, ExchangeState::Complete);
    }

    #[test]
    fn observers_see_every_change() {
        let (mut assembler, _tx, _cancel) = assembler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        assembler.subscribe(move |exchange| {
            sink.lock()
                .unwrap()
                .push((exchange.state, exchange.assistant_text.clone()));
        });

        assembler.apply_frame("He");
        assembler.apply_frame("llo");
        assembler.apply_frame(DEFAULT_END_OF_CONTENT);
        assembler.apply_frame("[]");

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (ExchangeState::Streaming, "He".to_string()),
                (ExchangeState::Streaming, "Hello".to_string()),
                (ExchangeState::AwaitingMetadata, "Hello".to_string()),
                (ExchangeState::Complete, "Hello".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_only_fires_without_content() {
        let (mut assembler, _tx, _cancel) = assembler();
        let before = assembler.no_data_deadline() - Duration::from_secs(1);
        assert_eq!(assembler.check_deadline(before), Disposition::Ignored);

        assembler.apply_frame("slow but steady");
        let after = assembler.no_data_deadline() + Duration::from_secs(1);
        assert_eq!(assembler.check_deadline(after), Disposition::Ignored);
        assert!(assembler.exchange().is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out_a_stalled_stream() {
        let (mut assembler, _tx, cancel) = assembler();

        let exchange = assembler.run().await;
        assert_eq!(exchange.state, ExchangeState::Failed);
        assert_eq!(exchange.failure_kind(), Some(FailureKind::Timeout));
        assert!(cancel.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn run_keeps_a_slow_stream_alive_past_the_deadline() {
        let (mut assembler, tx, _cancel) = assembler();

        let producer = tokio::spawn(async move {
            tx.send("first".to_string()).unwrap();
            tokio::time::sleep(DEFAULT_NO_DATA_TIMEOUT * 2).await;
            tx.send(" second".to_string()).unwrap();
            tx.send(DEFAULT_END_OF_CONTENT.to_string()).unwrap();
            tx.send("[]".to_string()).unwrap();
        });

        let exchange = assembler.run().await.clone();
        producer.await.unwrap();

        assert_eq!(exchange.state, ExchangeState::Complete);
        assert_eq!(exchange.assistant_text, "first second");
    }

    #[tokio::test]
    async fn run_fails_when_stream_closes_mid_content() {
        let (mut assembler, tx, _cancel) = assembler();
        tx.send("half an ans".to_string()).unwrap();
        drop(tx);

        let exchange = assembler.run().await;
        assert_eq!(exchange.state, ExchangeState::Failed);
        assert_eq!(exchange.failure_kind(), Some(FailureKind::Upstream));
        assert_eq!(exchange.assistant_text, "half an ans");
    }

    #[tokio::test]
    async fn run_completes_when_metadata_never_arrives() {
        let (mut assembler, tx, _cancel) = assembler();
        tx.send("text".to_string()).unwrap();
        tx.send(DEFAULT_END_OF_CONTENT.to_string()).unwrap();
        drop(tx);

        let exchange = assembler.run().await;
        assert_eq!(exchange.state, ExchangeState::Complete);
        assert!(exchange.citations.is_empty());
    }
}
