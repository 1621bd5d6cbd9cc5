//! The per-connection Bolt state machine (§4.3).

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Negotiating,
    Ready,
    Streaming,
    TxReady,
    TxStreaming,
    Failed,
    Defunct,
}

/// The request kinds the state machine cares about. Messages that carry no state
/// transition of their own (`GOODBYE`, `TELEMETRY`, `LOGOFF`/`LOGON`) aren't modelled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Hello,
    /// `LOGON`/`LOGOFF`: authenticates or de-authenticates an already-negotiated
    /// connection without otherwise touching the FSM (§4.3a).
    Auth,
    Run,
    Begin,
    Route,
    Reset,
    PullOrDiscard,
    Commit,
    Rollback,
}

impl ConnectionState {
    /// Whether `transition` is legal to send while in this state. A connection that sends
    /// an illegal transition has a bug upstream of the wire; the wire itself would answer
    /// with `IGNORED` rather than reject the bytes.
    pub fn accepts(self, transition: Transition) -> bool {
        use ConnectionState::*;
        use Transition::*;
        matches!(
            (self, transition),
            (Negotiating, Hello)
                | (Ready, Run | Begin | Route | Reset | Auth)
                | (Streaming, PullOrDiscard | Reset)
                | (TxReady, Run | Commit | Rollback | Reset)
                | (TxStreaming, PullOrDiscard | Reset)
                | (Failed, Reset)
        )
    }

    /// Advance on a terminal `SUCCESS`, given which transition produced it and, for `RUN`/
    /// `PULL`/`DISCARD`, whether more records remain.
    pub fn on_success(self, transition: Transition, has_more: bool) -> Result<Self> {
        use ConnectionState::*;
        use Transition::*;
        let next = match (self, transition) {
            (Negotiating, Hello) => Ready,
            (Ready, Run) => Streaming,
            (Ready, Begin) => TxReady,
            (Ready, Route) => Ready,
            (Ready, Reset) => Ready,
            (Ready, Auth) => Ready,
            (Streaming, PullOrDiscard) => {
                if has_more {
                    Streaming
                } else {
                    Ready
                }
            }
            (Streaming, Reset) => Ready,
            (TxReady, Run) => TxStreaming,
            (TxReady, Commit | Rollback) => Ready,
            (TxReady, Reset) => Ready,
            (TxStreaming, PullOrDiscard) => TxReady,
            (TxStreaming, Reset) => Ready,
            (Failed, Reset) => Ready,
            (state, transition) => {
                return Err(Error::from_debug(format_args!(
                    "illegal transition {transition:?} from {state:?}"
                )));
            }
        };
        Ok(next)
    }

    /// Advance on a terminal `FAILURE`.
    pub fn on_failure(self, transition: Transition) -> Self {
        match (self, transition) {
            (ConnectionState::Negotiating, _) => ConnectionState::Defunct,
            (ConnectionState::Failed, Transition::Reset) => ConnectionState::Defunct,
            _ => ConnectionState::Failed,
        }
    }

    /// Any I/O error, framing error, or protocol violation is unconditionally fatal.
    pub fn on_connection_error(self) -> Self {
        ConnectionState::Defunct
    }

    pub fn is_usable(self) -> bool {
        !matches!(self, ConnectionState::Defunct)
    }

    pub fn in_transaction(self) -> bool {
        matches!(self, ConnectionState::TxReady | ConnectionState::TxStreaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;
    use Transition::*;

    #[test]
    fn ready_run_success_moves_to_streaming() {
        assert_eq!(Ready.on_success(Run, true).unwrap(), Streaming);
    }

    #[test]
    fn streaming_exhausted_pull_returns_to_ready() {
        assert_eq!(Streaming.on_success(PullOrDiscard, false).unwrap(), Ready);
    }

    #[test]
    fn streaming_has_more_pull_stays_streaming() {
        assert_eq!(Streaming.on_success(PullOrDiscard, true).unwrap(), Streaming);
    }

    #[test]
    fn failed_state_only_accepts_reset() {
        assert!(Failed.accepts(Reset));
        assert!(!Failed.accepts(Run));
    }

    #[test]
    fn failure_during_negotiating_is_defunct() {
        assert_eq!(Negotiating.on_failure(Hello), Defunct);
    }

    #[test]
    fn failure_in_ready_moves_to_failed_not_defunct() {
        assert_eq!(Ready.on_failure(Run), Failed);
    }

    #[test]
    fn reset_recovers_from_failed_to_ready() {
        assert_eq!(Failed.on_success(Reset, false).unwrap(), Ready);
    }

    #[test]
    fn connection_error_is_always_defunct() {
        assert_eq!(TxStreaming.on_connection_error(), Defunct);
    }
}
