//! Property tests for the turn-folding invariants: no event ordering may
//! produce more than one open turn, and no turn leaves the open state more
//! than once.

use bytes::Bytes;
use proptest::prelude::*;

use voicebridge::core::assembler::{TurnSignal, TurnStatus, UtteranceAssembler};
use voicebridge::core::gateway::{CloseClass, InboundEvent};

fn arb_event() -> impl Strategy<Value = InboundEvent> {
    prop_oneof![
        Just(InboundEvent::SpeechStarted),
        Just(InboundEvent::SpeechStopped),
        Just(InboundEvent::BufferCommitted),
        Just(InboundEvent::AudioDone),
        "[a-z]{1,4}".prop_map(|id| InboundEvent::ResponseCreated { response_id: id }),
        Just(InboundEvent::ResponseDone { response_id: None }),
        "[a-z ]{0,8}".prop_map(|text| InboundEvent::SourceTranscriptDelta { text }),
        "[a-z ]{0,8}".prop_map(|text| InboundEvent::TargetTextDelta { text }),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(|audio| InboundEvent::AudioDelta {
            audio: Bytes::from(audio),
        }),
        Just(InboundEvent::RemoteError {
            code: None,
            message: "buffer too small".to_string(),
        }),
        Just(InboundEvent::RemoteError {
            code: Some("server_error".to_string()),
            message: "boom".to_string(),
        }),
        Just(InboundEvent::Closed {
            code: Some(1006),
            class: CloseClass::Abnormal,
            reason: String::new(),
        }),
    ]
}

proptest! {
    /// However events arrive, at most one turn is ever open, and it is
    /// genuinely open.
    #[test]
    fn at_most_one_open_turn(events in proptest::collection::vec(arb_event(), 0..64)) {
        let mut asm = UtteranceAssembler::new();
        for event in events {
            asm.apply(event);
            if let Some(turn) = asm.active_turn() {
                prop_assert!(turn.status.is_open());
            }
        }
    }

    /// Turns leave the open state at most once per opening: the total
    /// number of finalize signals never exceeds the number of openings.
    #[test]
    fn finalize_at_most_once_per_turn(events in proptest::collection::vec(arb_event(), 0..64)) {
        let mut asm = UtteranceAssembler::new();
        let mut opened = 0usize;
        let mut finalized = 0usize;
        for event in events {
            for signal in asm.apply(event) {
                match signal {
                    TurnSignal::TurnOpened { .. } => opened += 1,
                    TurnSignal::TurnFinalized(turn) => {
                        finalized += 1;
                        prop_assert!(!turn.status.is_open());
                    }
                    _ => {}
                }
            }
            prop_assert!(finalized <= opened);
        }
        // Force-finalizing afterwards closes the remaining turn, if any,
        // and leaves nothing behind.
        if asm.force_finalize(TurnStatus::TimedOut).is_some() {
            finalized += 1;
        }
        prop_assert!(finalized <= opened);
        prop_assert!(asm.active_turn().is_none());
        prop_assert!(asm.force_finalize(TurnStatus::TimedOut).is_none());
    }

    /// A fatal signal is always preceded (in the same batch) by the
    /// finalization of whatever turn was open.
    #[test]
    fn fatal_errors_never_leave_a_turn_open(events in proptest::collection::vec(arb_event(), 0..64)) {
        let mut asm = UtteranceAssembler::new();
        for event in events {
            let signals = asm.apply(event);
            if signals.iter().any(|s| matches!(s, TurnSignal::FatalError(_))) {
                prop_assert!(asm.active_turn().is_none());
            }
        }
    }
}
