//! Handshake phase machine for relayed sessions
//!
//! A session's client leg walks a strict three-phase handshake: one `sdp`
//! exchange first, then any number of `candidate` exchanges. The phase
//! never regresses; a message arriving out of order is dropped by the
//! relay without touching the phase.

use vidgate_proto::SignalKey;

/// Where a session stands in the signaling handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakePhase {
    /// No signaling message accepted yet
    #[default]
    Start,
    /// The client's offer has been forwarded to the worker
    SdpExchanged,
    /// Candidates are flowing; re-entrant, candidates may arrive repeatedly
    CandidateExchanging,
}

impl HandshakePhase {
    /// Decide whether a message with `key` is admissible in this phase.
    ///
    /// Returns the phase after accepting the message, or `None` when the
    /// message violates the handshake order and must be dropped. `error`
    /// frames are never admissible toward the worker.
    pub fn admit(self, key: SignalKey) -> Option<HandshakePhase> {
        match (self, key) {
            (HandshakePhase::Start, SignalKey::Sdp) => Some(HandshakePhase::SdpExchanged),
            (HandshakePhase::SdpExchanged, SignalKey::Candidate)
            | (HandshakePhase::CandidateExchanging, SignalKey::Candidate) => {
                Some(HandshakePhase::CandidateExchanging)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdp_only_from_start() {
        assert_eq!(
            HandshakePhase::Start.admit(SignalKey::Sdp),
            Some(HandshakePhase::SdpExchanged)
        );
        assert_eq!(HandshakePhase::SdpExchanged.admit(SignalKey::Sdp), None);
        assert_eq!(
            HandshakePhase::CandidateExchanging.admit(SignalKey::Sdp),
            None
        );
    }

    #[test]
    fn test_candidate_requires_sdp_first() {
        assert_eq!(HandshakePhase::Start.admit(SignalKey::Candidate), None);
        assert_eq!(
            HandshakePhase::SdpExchanged.admit(SignalKey::Candidate),
            Some(HandshakePhase::CandidateExchanging)
        );
    }

    #[test]
    fn test_candidate_exchange_is_idempotent() {
        let mut phase = HandshakePhase::Start;
        phase = phase.admit(SignalKey::Sdp).unwrap();
        for _ in 0..5 {
            phase = phase.admit(SignalKey::Candidate).unwrap();
            assert_eq!(phase, HandshakePhase::CandidateExchanging);
        }
    }

    #[test]
    fn test_phase_never_regresses() {
        // Walk the only accepting path and check each step is monotone.
        let order = |p: HandshakePhase| match p {
            HandshakePhase::Start => 0,
            HandshakePhase::SdpExchanged => 1,
            HandshakePhase::CandidateExchanging => 2,
        };
        for phase in [
            HandshakePhase::Start,
            HandshakePhase::SdpExchanged,
            HandshakePhase::CandidateExchanging,
        ] {
            for key in [SignalKey::Sdp, SignalKey::Candidate, SignalKey::Error] {
                if let Some(next) = phase.admit(key) {
                    assert!(order(next) >= order(phase));
                }
            }
        }
    }

    #[test]
    fn test_error_frames_never_admitted() {
        for phase in [
            HandshakePhase::Start,
            HandshakePhase::SdpExchanged,
            HandshakePhase::CandidateExchanging,
        ] {
            assert_eq!(phase.admit(SignalKey::Error), None);
        }
    }
}
