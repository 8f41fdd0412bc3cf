/// Gate states. `Armed` can fire once; `Cooling` suppresses further fires
/// until the playback-finished event re-arms the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Armed,
    Cooling,
}

/// Outcome of a fire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fire {
    Fired,
    Suppressed,
}

/// CueGate guarantees at most one in-flight audio cue. The first attempt in
/// an armed interval fires and flips the gate to `Cooling`; every further
/// attempt is suppressed until `effect_finished` re-arms it. Nothing else
/// re-arms the gate; in particular the watched condition going inactive
/// does not.
#[derive(Debug)]
pub struct CueGate {
    state: GateState,
}

impl CueGate {
    pub fn new() -> Self {
        Self {
            state: GateState::Armed,
        }
    }

    /// Decide and transition in a single step.
    pub fn attempt_fire(&mut self) -> Fire {
        match self.state {
            GateState::Armed => {
                self.state = GateState::Cooling;
                Fire::Fired
            }
            GateState::Cooling => Fire::Suppressed,
        }
    }

    /// Playback finished; open the gate again. A no-op when already armed.
    pub fn effect_finished(&mut self) {
        self.state = GateState::Armed;
    }

    pub fn state(&self) -> GateState {
        self.state
    }
}

impl Default for CueGate {
    fn default() -> Self {
        Self::new()
    }
}
