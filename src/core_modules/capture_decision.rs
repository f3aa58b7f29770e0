// THEORY:
// The capture decision is an explicit three-state machine with a single transition
// function, so every rule can be tested in isolation.
//
//   SEEKING --stable && ratio < threshold--> CAPTURE_TRIGGERED --(immediately)--> SEEKING
//   SEEKING --ratio >= threshold-----------> COMPLETE (terminal until reset)
//
// `CaptureTriggered` is emitted, never rested in: a capture is a one-shot action per
// stable frame. Completion does not require a capture or stability, only coverage.

/// States of the capture / completion machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CaptureState {
    #[default]
    Seeking,
    CaptureTriggered,
    Complete,
}

/// Outcome of one step: the state the frame produced and the state the session rests in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub emitted: CaptureState,
    pub next: CaptureState,
}

impl Transition {
    pub fn should_capture(&self) -> bool {
        self.emitted == CaptureState::CaptureTriggered
    }

    pub fn is_complete(&self) -> bool {
        self.next == CaptureState::Complete
    }
}

pub fn transition(
    state: CaptureState,
    is_stable: bool,
    coverage_ratio: f64,
    completion_threshold: f64,
) -> Transition {
    let rest = |emitted, next| Transition { emitted, next };
    match state {
        CaptureState::Complete => rest(CaptureState::Complete, CaptureState::Complete),
        CaptureState::Seeking | CaptureState::CaptureTriggered => {
            if coverage_ratio >= completion_threshold {
                rest(CaptureState::Complete, CaptureState::Complete)
            } else if is_stable && coverage_ratio < completion_threshold {
                rest(CaptureState::CaptureTriggered, CaptureState::Seeking)
            } else {
                rest(CaptureState::Seeking, CaptureState::Seeking)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = 0.85;

    #[test]
    fn starts_seeking() {
        assert_eq!(CaptureState::default(), CaptureState::Seeking);
    }

    #[test]
    fn stable_frame_below_threshold_captures_and_returns_to_seeking() {
        let t = transition(CaptureState::Seeking, true, 0.3, THRESHOLD);
        assert!(t.should_capture());
        assert_eq!(t.next, CaptureState::Seeking);
    }

    #[test]
    fn unstable_frame_does_not_capture() {
        let t = transition(CaptureState::Seeking, false, 0.3, THRESHOLD);
        assert!(!t.should_capture());
        assert_eq!(t, Transition { emitted: CaptureState::Seeking, next: CaptureState::Seeking });
    }

    #[test]
    fn completion_ignores_stability() {
        for stable in [true, false] {
            let t = transition(CaptureState::Seeking, stable, 0.85, THRESHOLD);
            assert!(t.is_complete());
            assert!(!t.should_capture());
        }
    }

    #[test]
    fn complete_is_terminal() {
        let t = transition(CaptureState::Complete, true, 0.1, THRESHOLD);
        assert_eq!(t, Transition { emitted: CaptureState::Complete, next: CaptureState::Complete });
    }

    #[test]
    fn synthetic_coverage_sweep_captures_twice_then_completes() {
        let mut state = CaptureState::Seeking;
        let mut captures = Vec::new();
        for ratio in [0.0, 0.5, 0.9] {
            let t = transition(state, true, ratio, THRESHOLD);
            captures.push(t.should_capture());
            state = t.next;
        }
        assert_eq!(captures, vec![true, true, false]);
        assert_eq!(state, CaptureState::Complete);
    }

    #[test]
    fn nan_ratio_keeps_seeking() {
        let t = transition(CaptureState::Seeking, true, f64::NAN, THRESHOLD);
        assert_eq!(t.next, CaptureState::Seeking);
        assert!(!t.should_capture());
    }
}
