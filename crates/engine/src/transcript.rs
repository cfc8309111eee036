use crate::error::{
    EngineResult, ExchangeInFlightSnafu, ExchangeNotFinishedSnafu, UnknownExchangeSnafu,
};
use crate::exchange::{Exchange, ExchangeState};
use crate::ids::ExchangeId;

/// Ordered, append-only record of finished exchanges on one connection.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<Exchange>,
    live: Option<ExchangeId>,
}

/// One prior turn, in the shape generation requests carry as history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryTurn<'a> {
    pub user_text: &'a str,
    pub assistant_text: &'a str,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Exchange] {
        &self.entries
    }

    pub fn live_exchange(&self) -> Option<ExchangeId> {
        self.live
    }

    /// False while an exchange is streaming or awaiting metadata.
    pub fn accepts_input(&self) -> bool {
        self.live.is_none()
    }

    /// Reserves the connection for a new exchange.
    pub fn begin_exchange(&mut self, user_text: impl Into<String>) -> EngineResult<Exchange> {
        let exchange = Exchange::new(ExchangeId::new_v7(), user_text);
        if let Some(active) = self.live {
            return ExchangeInFlightSnafu {
                stage: "begin-exchange",
                active,
                attempted: exchange.id,
            }
            .fail();
        }

        self.live = Some(exchange.id);
        Ok(exchange)
    }

    /// Appends a terminal exchange and frees the connection.
    pub fn finish_exchange(&mut self, exchange: Exchange) -> EngineResult<&Exchange> {
        if self.live != Some(exchange.id) {
            return UnknownExchangeSnafu {
                stage: "finish-exchange",
                exchange_id: exchange.id,
            }
            .fail();
        }
        if !exchange.is_terminal() {
            return ExchangeNotFinishedSnafu {
                stage: "finish-exchange",
                exchange_id: exchange.id,
            }
            .fail();
        }

        self.live = None;
        self.entries.push(exchange);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Completed turns only; failed exchanges are not replayed to the model.
    pub fn history(&self) -> impl Iterator<Item = HistoryTurn<'_>> {
        self.entries
            .iter()
            .filter(|exchange| exchange.state == ExchangeState::Complete)
            .filter(|exchange| !exchange.assistant_text.trim().is_empty())
            .map(|exchange| HistoryTurn {
                user_text: &exchange.user_text,
                assistant_text: &exchange.assistant_text,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;
    use crate::exchange::ExchangeFailure;

    fn finished(mut exchange: Exchange, text: &str) -> Exchange {
        exchange.assistant_text = text.to_string();
        exchange.state = ExchangeState::Complete;
        exchange
    }

    #[test]
    fn one_live_exchange_at_a_time() {
        let mut transcript = Transcript::new();
        let first = transcript.begin_exchange("first").unwrap();
        assert!(!transcript.accepts_input());

        let error = transcript.begin_exchange("second").unwrap_err();
        assert!(matches!(error, EngineError::ExchangeInFlight { active, .. } if active == first.id));

        transcript.finish_exchange(finished(first, "ok")).unwrap();
        assert!(transcript.accepts_input());
        assert!(transcript.begin_exchange("second").is_ok());
    }

    #[test]
    fn live_exchange_cannot_be_finished() {
        let mut transcript = Transcript::new();
        let exchange = transcript.begin_exchange("q").unwrap();
        let id = exchange.id;

        let error = transcript.finish_exchange(exchange).unwrap_err();
        assert!(matches!(error, EngineError::ExchangeNotFinished { exchange_id, .. } if exchange_id == id));
        assert_eq!(transcript.live_exchange(), Some(id));
    }

    #[test]
    fn foreign_exchange_is_rejected() {
        let mut transcript = Transcript::new();
        let stranger = finished(Exchange::new(ExchangeId::new_v7(), "q"), "a");
        assert!(matches!(
            transcript.finish_exchange(stranger),
            Err(EngineError::UnknownExchange { .. })
        ));
    }

    #[test]
    fn history_skips_failed_turns() {
        let mut transcript = Transcript::new();
        let ok = transcript.begin_exchange("budget?").unwrap();
        transcript.finish_exchange(finished(ok, "About $50k.")).unwrap();

        let mut failed = transcript.begin_exchange("timeline?").unwrap();
        failed.state = ExchangeState::Failed;
        failed.failure = Some(ExchangeFailure::timeout("stalled"));
        transcript.finish_exchange(failed).unwrap();

        let history = transcript.history().collect::<Vec<_>>();
        assert_eq!(transcript.entries().len(), 2);
        assert_eq!(
            history,
            vec![HistoryTurn {
                user_text: "budget?",
                assistant_text: "About $50k."
            }]
        );
    }
}
