//! Repetition counting state machine.
//!
//! A continuous per-arm elbow angle signal is converted into discrete repetition counts. Two
//! distinct thresholds (contraction and extension) with a gap between them make the machine
//! immune to oscillation around a single cutoff, and both arms have to cross a threshold
//! independently before a transition fires, so one-armed or asymmetric motion never counts.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::angle::AnglePair;

/// The discrete phase of a repetition cycle.
///
/// Serialized as the display strings the original tracker UI consumed, so the wire format is
/// Spanish: `"Esperando"`, `"Sube"`, `"Bien hecho"`, `"Reinicio"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepState {
    /// Idle, waiting for the user to start pulling up.
    #[default]
    Waiting,
    /// Both arms are contracted; the user is in the up phase.
    Up,
    /// A full repetition was just confirmed. Transient: the machine settles back to
    /// [`RepState::Waiting`] without consuming another frame.
    DownGood,
    /// An explicit reset was applied. Transient like [`RepState::DownGood`].
    Reset,
}

impl RepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepState::Waiting => "Esperando",
            RepState::Up => "Sube",
            RepState::DownGood => "Bien hecho",
            RepState::Reset => "Reinicio",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "Esperando" => RepState::Waiting,
            "Sube" => RepState::Up,
            "Bien hecho" => RepState::DownGood,
            "Reinicio" => RepState::Reset,
            _ => return None,
        })
    }

    /// Transient states emit for a single frame and immediately settle back to
    /// [`RepState::Waiting`].
    fn settled(self) -> Self {
        match self {
            RepState::DownGood | RepState::Reset => RepState::Waiting,
            state => state,
        }
    }
}

impl fmt::Display for RepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RepState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RepState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RepState::from_str(&s).ok_or_else(|| de::Error::custom(format!("unknown state `{s}`")))
    }
}

/// Hysteresis thresholds for one exercise type, in degrees.
///
/// The gap between `contract` and `extend` is what keeps a noisy angle signal hovering near a
/// cutoff from producing double counts, so [`Thresholds::new`] rejects configurations without
/// one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    contract: f32,
    extend: f32,
}

impl Thresholds {
    /// Pull-up counting defaults: arms count as contracted below 90° and as fully extended above
    /// 160°.
    pub const PULL_UPS: Self = Self {
        contract: 90.0,
        extend: 160.0,
    };

    /// Push-up counting: elbows bend less at the bottom of a push-up than at the top of a
    /// pull-up, so the contraction cutoff sits higher.
    pub const PUSH_UPS: Self = Self {
        contract: 100.0,
        extend: 155.0,
    };

    /// Creates a custom threshold pair.
    ///
    /// `contract` must be strictly below `extend` and both must lie in `(0, 180)`.
    pub fn new(contract: f32, extend: f32) -> anyhow::Result<Self> {
        anyhow::ensure!(
            contract > 0.0 && extend < 180.0 && contract < extend,
            "invalid thresholds: contract={contract}, extend={extend} \
             (need 0 < contract < extend < 180)",
        );
        Ok(Self { contract, extend })
    }

    #[inline]
    pub fn contract(&self) -> f32 {
        self.contract
    }

    #[inline]
    pub fn extend(&self) -> f32 {
        self.extend
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::PULL_UPS
    }
}

/// The pure transition function of the counting state machine.
///
/// Given the settled state of the previous frame, the angles observed in the current frame and
/// the running count, returns the state to emit for this frame and the new count. The count only
/// ever changes on the [`RepState::Up`] → [`RepState::DownGood`] transition, where it increments
/// by exactly 1.
pub fn step(
    state: RepState,
    angles: AnglePair,
    count: u32,
    thresholds: &Thresholds,
) -> (RepState, u32) {
    match state.settled() {
        RepState::Waiting => {
            if angles.both_below(thresholds.contract()) {
                (RepState::Up, count)
            } else {
                (RepState::Waiting, count)
            }
        }
        RepState::Up => {
            if angles.both_above(thresholds.extend()) {
                (RepState::DownGood, count + 1)
            } else {
                (RepState::Up, count)
            }
        }
        // `settled` never returns the transient states.
        RepState::DownGood | RepState::Reset => unreachable!(),
    }
}

/// Counting state for one session.
///
/// Not reentrant: a counter must only ever be fed frames from a single session, in dispatch
/// order. Sessions never share counters.
#[derive(Debug)]
pub struct RepCounter {
    thresholds: Thresholds,
    state: RepState,
    count: u32,
}

impl RepCounter {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: RepState::Waiting,
            count: 0,
        }
    }

    /// Feeds one frame's angle observation into the state machine.
    ///
    /// `None` means the detector found no pose in the frame; the machine holds its state, missing
    /// data never forces a transition. The returned state is the one to report for this frame; it
    /// may be the transient [`RepState::DownGood`] pulse while the stored state has already
    /// settled back to [`RepState::Waiting`].
    pub fn observe(&mut self, angles: Option<AnglePair>) -> RepState {
        let Some(angles) = angles else {
            return self.state;
        };

        let (emitted, count) = step(self.state, angles, self.count, &self.thresholds);
        if count != self.count {
            log::debug!("repetition confirmed, count {} -> {}", self.count, count);
        }
        self.state = emitted.settled();
        self.count = count;
        emitted
    }

    /// Clears the count and returns the machine to [`RepState::Waiting`], atomically.
    ///
    /// Idempotent; resetting an idle counter is a no-op.
    pub fn reset(&mut self) -> RepState {
        self.state = RepState::Reset.settled();
        self.count = 0;
        RepState::Reset
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn state(&self) -> RepState {
        self.state
    }

    #[inline]
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(deg: f32) -> Option<AnglePair> {
        Some(AnglePair::new(deg, deg))
    }

    #[test]
    fn full_cycle_counts_once() {
        let mut counter = RepCounter::new(Thresholds::PULL_UPS);
        let emitted: Vec<_> = [180.0, 80.0, 180.0]
            .into_iter()
            .map(|deg| counter.observe(pair(deg)))
            .collect();

        assert_eq!(emitted, [RepState::Waiting, RepState::Up, RepState::DownGood]);
        assert_eq!(counter.count(), 1);
        assert_eq!(counter.state(), RepState::Waiting);
    }

    #[test]
    fn pull_up_angle_trace() {
        let mut counter = RepCounter::new(Thresholds::PULL_UPS);
        for (right, left) in [(170.0, 170.0), (85.0, 82.0), (170.0, 175.0)] {
            counter.observe(Some(AnglePair::new(right, left)));
        }
        assert_eq!(counter.count(), 1);
        assert_eq!(counter.state(), RepState::Waiting);
        assert_eq!(counter.state().as_str(), "Esperando");
    }

    #[test]
    fn single_arm_dip_does_not_count() {
        let mut counter = RepCounter::new(Thresholds::PULL_UPS);
        for (right, left) in [(170.0, 170.0), (85.0, 170.0), (170.0, 170.0)] {
            counter.observe(Some(AnglePair::new(right, left)));
        }
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.state(), RepState::Waiting);
    }

    #[test]
    fn detection_miss_holds_state() {
        let mut counter = RepCounter::new(Thresholds::PULL_UPS);
        counter.observe(pair(80.0));
        assert_eq!(counter.state(), RepState::Up);

        // A frame without a detection must not disturb the in-progress repetition.
        assert_eq!(counter.observe(None), RepState::Up);
        assert_eq!(counter.state(), RepState::Up);

        counter.observe(pair(175.0));
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn hysteresis_band_is_inert() {
        // Angles between the thresholds must not trigger transitions in either direction.
        let mut counter = RepCounter::new(Thresholds::PULL_UPS);
        counter.observe(pair(120.0));
        assert_eq!(counter.state(), RepState::Waiting);

        counter.observe(pair(80.0));
        counter.observe(pair(120.0));
        assert_eq!(counter.state(), RepState::Up);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn partial_range_of_motion_does_not_double_count() {
        let mut counter = RepCounter::new(Thresholds::PULL_UPS);
        // Two dips without full extension in between: only the final extension counts.
        for deg in [170.0, 80.0, 120.0, 80.0, 170.0] {
            counter.observe(pair(deg));
        }
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut counter = RepCounter::new(Thresholds::PULL_UPS);
        for deg in [170.0, 80.0, 170.0, 80.0, 170.0] {
            counter.observe(pair(deg));
        }
        assert_eq!(counter.count(), 2);

        assert_eq!(counter.reset(), RepState::Reset);
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.state(), RepState::Waiting);

        counter.reset();
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.state(), RepState::Waiting);
    }

    #[test]
    fn reset_mid_repetition() {
        let mut counter = RepCounter::new(Thresholds::PULL_UPS);
        counter.observe(pair(80.0));
        counter.reset();

        // The interrupted repetition must not complete after the reset.
        counter.observe(pair(175.0));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn invalid_thresholds_rejected() {
        assert!(Thresholds::new(160.0, 90.0).is_err());
        assert!(Thresholds::new(90.0, 90.0).is_err());
        assert!(Thresholds::new(0.0, 160.0).is_err());
        assert!(Thresholds::new(90.0, 180.0).is_err());
        assert!(Thresholds::new(95.0, 150.0).is_ok());
    }

    #[test]
    fn state_strings_round_trip() {
        for state in [RepState::Waiting, RepState::Up, RepState::DownGood, RepState::Reset] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(serde_json::from_str::<RepState>(&json).unwrap(), state);
        }
        assert_eq!(serde_json::to_string(&RepState::DownGood).unwrap(), "\"Bien hecho\"");
    }
}
