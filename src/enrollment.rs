//! Multi-pose enrollment capture.
//!
//! The session walks the subject through [`Pose::SEQUENCE`], one accepted
//! sample per pose. Every call to [`EnrollmentSession::advance`] consumes one
//! frame of the global attempt budget. Frames are never retained.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::{Embedding, EnrollmentSet, MIN_ENROLLED};
use crate::provider::{CaptureError, EmbeddingProvider, Frame};
use crate::quality::{QualityGate, QualityVerdict};
use crate::uniqueness::{is_unique_with, uniqueness_score, UNIQUENESS_THRESHOLD};

pub const POSE_COUNT: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pose {
    Frontal,
    Left,
    Right,
    Up,
    Down,
    Closer,
    Farther,
}

impl Pose {
    pub const SEQUENCE: [Pose; POSE_COUNT] = [
        Pose::Frontal,
        Pose::Left,
        Pose::Right,
        Pose::Up,
        Pose::Down,
        Pose::Closer,
        Pose::Farther,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn instruction(self) -> &'static str {
        match self {
            Pose::Frontal => "Look straight at the camera (frontal view)",
            Pose::Left => "Turn slightly to the left",
            Pose::Right => "Turn slightly to the right",
            Pose::Up => "Tilt your head up slightly",
            Pose::Down => "Tilt your head down slightly",
            Pose::Closer => "Move slightly closer to the camera",
            Pose::Farther => "Move slightly further from the camera",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    NoFace,
    MultipleFaces(usize),
    TooClose,
    TooFar,
    EncodingFailed,
    NearDuplicate,
}

impl RejectReason {
    /// Text to show the subject.
    pub fn prompt(self) -> &'static str {
        match self {
            RejectReason::NoFace => "No face detected",
            RejectReason::MultipleFaces(_) => "Multiple faces detected",
            RejectReason::TooClose => "Move further from camera",
            RejectReason::TooFar => "Move closer to camera",
            RejectReason::EncodingFailed => "Could not encode face",
            RejectReason::NearDuplicate => "Need more variation in position",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    AwaitingFrame(usize),
    Complete,
    Aborted,
}

impl EnrollmentState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EnrollmentState::AwaitingFrame(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Accepted {
        pose: Pose,
        forced: bool,
        uniqueness: Option<f64>,
    },
    Rejected {
        pose: Pose,
        reason: RejectReason,
    },
    /// The session had already terminated.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentTransition {
    pub outcome: CaptureOutcome,
    pub state: EnrollmentState,
}

#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("captured {captured} face samples, at least {required} are required")]
    InsufficientSamples { captured: usize, required: usize },
    #[error("enrollment is still in progress with {captured} face samples")]
    InProgress { captured: usize },
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentPolicy {
    /// Total frames the session may consume.
    pub max_attempts: u32,
    /// Consecutive near-duplicates tolerated at one pose before forcing.
    pub pose_retry_limit: u32,
    pub allow_forced_accept: bool,
    pub uniqueness_threshold: f64,
    pub jitters: u32,
}

impl Default for EnrollmentPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            pose_retry_limit: 10,
            allow_forced_accept: true,
            uniqueness_threshold: UNIQUENESS_THRESHOLD,
            jitters: 3,
        }
    }
}

pub struct EnrollmentSession {
    policy: EnrollmentPolicy,
    quality: QualityGate,
    accepted: Vec<Embedding>,
    attempts: u32,
    pose_retries: u32,
    forced: usize,
    state: EnrollmentState,
}

impl EnrollmentSession {
    pub fn new(policy: EnrollmentPolicy, quality: QualityGate) -> Self {
        Self {
            policy,
            quality,
            accepted: Vec::with_capacity(POSE_COUNT),
            attempts: 0,
            pose_retries: 0,
            forced: 0,
            state: EnrollmentState::AwaitingFrame(0),
        }
    }

    pub fn state(&self) -> EnrollmentState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn captured(&self) -> usize {
        self.accepted.len()
    }

    /// Samples taken through the forced-accept branch.
    pub fn forced_accepts(&self) -> usize {
        self.forced
    }

    pub fn current_pose(&self) -> Option<Pose> {
        match self.state {
            EnrollmentState::AwaitingFrame(index) => Pose::SEQUENCE.get(index).copied(),
            _ => None,
        }
    }

    pub fn advance<P>(&mut self, frame: &P::Frame, provider: &mut P) -> EnrollmentTransition
    where
        P: EmbeddingProvider,
    {
        let Some(pose) = self.current_pose() else {
            return EnrollmentTransition {
                outcome: CaptureOutcome::Ignored,
                state: self.state,
            };
        };

        self.attempts += 1;
        let outcome = self.evaluate(pose, frame, provider);

        self.state = if self.accepted.len() == POSE_COUNT {
            info!("enrollment complete after {} frames", self.attempts);
            EnrollmentState::Complete
        } else if self.attempts >= self.policy.max_attempts {
            warn!(
                "enrollment budget of {} frames exhausted with {}/{} samples",
                self.policy.max_attempts,
                self.accepted.len(),
                POSE_COUNT
            );
            EnrollmentState::Aborted
        } else {
            EnrollmentState::AwaitingFrame(self.accepted.len())
        };

        EnrollmentTransition {
            outcome,
            state: self.state,
        }
    }

    fn evaluate<P>(&mut self, pose: Pose, frame: &P::Frame, provider: &mut P) -> CaptureOutcome
    where
        P: EmbeddingProvider,
    {
        let faces = provider.detect_faces(frame).unwrap_or_else(|err| {
            warn!("frame {}: {}", self.attempts, err);
            Vec::new()
        });

        let face = match faces.as_slice() {
            [face] => *face,
            others => {
                self.pose_retries = 0;
                let reason = if others.is_empty() {
                    RejectReason::NoFace
                } else {
                    RejectReason::MultipleFaces(others.len())
                };
                debug!("frame {}: {}", self.attempts, reason.prompt());
                return CaptureOutcome::Rejected { pose, reason };
            }
        };

        let (width, height) = frame.dimensions();
        let reason = match self.quality.accepts(&face, width, height) {
            QualityVerdict::Accept => None,
            QualityVerdict::TooClose => Some(RejectReason::TooClose),
            QualityVerdict::TooFar => Some(RejectReason::TooFar),
        };
        if let Some(reason) = reason {
            debug!("frame {}: {}", self.attempts, reason.prompt());
            return CaptureOutcome::Rejected { pose, reason };
        }

        let candidate = match provider.compute_embedding(frame, &face, self.policy.jitters) {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!("frame {}: {}", self.attempts, err);
                self.pose_retries += 1;
                return CaptureOutcome::Rejected {
                    pose,
                    reason: RejectReason::EncodingFailed,
                };
            }
        };

        let distance = |a: &Embedding, b: &Embedding| provider.distance(a, b);
        let uniqueness = uniqueness_score(&candidate, &self.accepted, distance);
        let unique = is_unique_with(
            &candidate,
            &self.accepted,
            distance,
            self.policy.uniqueness_threshold,
        );

        let forced = !unique
            && self.policy.allow_forced_accept
            && self.pose_retries >= self.policy.pose_retry_limit;
        if !unique && !forced {
            self.pose_retries += 1;
            debug!(
                "frame {}: near-duplicate at {:?} ({} retries)",
                self.attempts, pose, self.pose_retries
            );
            return CaptureOutcome::Rejected {
                pose,
                reason: RejectReason::NearDuplicate,
            };
        }

        if forced {
            self.forced += 1;
            warn!(
                "forcing {:?} sample after {} near-duplicates",
                pose, self.pose_retries
            );
        }
        self.accepted.push(candidate);
        self.pose_retries = 0;
        info!(
            "captured {}/{} ({:?})",
            self.accepted.len(),
            POSE_COUNT,
            pose
        );
        CaptureOutcome::Accepted {
            pose,
            forced,
            uniqueness,
        }
    }

    /// Ends a terminated session and yields the collected set.
    ///
    /// A session still awaiting frames cannot be finished. Fewer than
    /// [`MIN_ENROLLED`] samples is an error and the partial samples are
    /// dropped. Between that and a full set the enrollment is degraded but
    /// usable.
    pub fn finish(self) -> Result<EnrollmentSet, EnrollmentError> {
        let captured = self.accepted.len();
        if !self.state.is_terminal() {
            return Err(EnrollmentError::InProgress { captured });
        }
        if captured < MIN_ENROLLED {
            return Err(EnrollmentError::InsufficientSamples {
                captured,
                required: MIN_ENROLLED,
            });
        }
        if captured < POSE_COUNT {
            warn!("degraded enrollment with {captured}/{POSE_COUNT} samples");
        }
        Ok(EnrollmentSet::from_trusted(self.accepted))
    }
}

impl Default for EnrollmentSession {
    fn default() -> Self {
        Self::new(EnrollmentPolicy::default(), QualityGate::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::embedding_with;
    use crate::provider::ProviderError;
    use crate::quality::FaceBox;

    /// What the fake provider reports for one frame.
    #[derive(Clone)]
    enum Shot {
        Faces(usize),
        Sized(f32),
        Sample(f64),
        Unencodable,
    }

    struct Still(Shot);

    impl Frame for Still {
        fn dimensions(&self) -> (u32, u32) {
            (1000, 1000)
        }
    }

    struct Fake;

    impl EmbeddingProvider for Fake {
        type Frame = Still;

        fn detect_faces(&mut self, frame: &Still) -> Result<Vec<FaceBox>, ProviderError> {
            let n = match frame.0 {
                Shot::Faces(n) => n,
                _ => 1,
            };
            let side = match frame.0 {
                Shot::Sized(side) => side,
                _ => 300.0,
            };
            Ok(vec![FaceBox::new(0.0, 0.0, side, side); n])
        }

        fn compute_embedding(
            &mut self,
            frame: &Still,
            _face: &FaceBox,
            _jitters: u32,
        ) -> Result<Embedding, ProviderError> {
            match frame.0 {
                Shot::Sample(value) => Ok(embedding_with(value)),
                Shot::Unencodable => Err(ProviderError::embedding("model returned nothing")),
                _ => Ok(embedding_with(0.0)),
            }
        }
    }

    fn feed(session: &mut EnrollmentSession, shot: Shot) -> EnrollmentTransition {
        session.advance(&Still(shot), &mut Fake)
    }

    #[test]
    fn seven_distinct_samples_complete() {
        let mut session = EnrollmentSession::default();
        for i in 0..POSE_COUNT {
            let step = feed(&mut session, Shot::Sample(i as f64));
            assert!(matches!(step.outcome, CaptureOutcome::Accepted { forced: false, .. }));
        }
        assert_eq!(session.state(), EnrollmentState::Complete);
        assert_eq!(session.finish().unwrap().len(), POSE_COUNT);
    }

    #[test]
    fn poses_follow_sequence() {
        let mut session = EnrollmentSession::default();
        assert_eq!(session.current_pose(), Some(Pose::Frontal));
        feed(&mut session, Shot::Sample(0.0));
        assert_eq!(session.current_pose(), Some(Pose::Left));
        assert_eq!(session.state(), EnrollmentState::AwaitingFrame(1));
    }

    #[test]
    fn no_face_and_crowd_do_not_advance() {
        let mut session = EnrollmentSession::default();
        let step = feed(&mut session, Shot::Faces(0));
        assert_eq!(
            step.outcome,
            CaptureOutcome::Rejected {
                pose: Pose::Frontal,
                reason: RejectReason::NoFace
            }
        );
        let step = feed(&mut session, Shot::Faces(2));
        assert_eq!(
            step.outcome,
            CaptureOutcome::Rejected {
                pose: Pose::Frontal,
                reason: RejectReason::MultipleFaces(2)
            }
        );
        assert_eq!(session.state(), EnrollmentState::AwaitingFrame(0));
        assert_eq!(session.attempts(), 2);
    }

    #[test]
    fn quality_rejections_use_budget() {
        let mut session = EnrollmentSession::default();
        let far = feed(&mut session, Shot::Sized(100.0));
        let close = feed(&mut session, Shot::Sized(700.0));
        assert!(matches!(
            far.outcome,
            CaptureOutcome::Rejected { reason: RejectReason::TooFar, .. }
        ));
        assert!(matches!(
            close.outcome,
            CaptureOutcome::Rejected { reason: RejectReason::TooClose, .. }
        ));
        assert_eq!(session.attempts(), 2);
        assert_eq!(session.captured(), 0);
    }

    #[test]
    fn stuck_pose_is_forced_after_retry_limit() {
        let mut session = EnrollmentSession::default();
        feed(&mut session, Shot::Sample(0.0));
        for _ in 0..10 {
            let step = feed(&mut session, Shot::Sample(0.10));
            assert!(matches!(
                step.outcome,
                CaptureOutcome::Rejected { reason: RejectReason::NearDuplicate, .. }
            ));
        }
        let step = feed(&mut session, Shot::Sample(0.10));
        assert!(matches!(
            step.outcome,
            CaptureOutcome::Accepted { pose: Pose::Left, forced: true, .. }
        ));
        assert_eq!(session.forced_accepts(), 1);
    }

    #[test]
    fn forced_accept_can_be_disabled() {
        let policy = EnrollmentPolicy {
            allow_forced_accept: false,
            ..EnrollmentPolicy::default()
        };
        let mut session = EnrollmentSession::new(policy, QualityGate::default());
        feed(&mut session, Shot::Sample(0.0));
        for _ in 0..20 {
            let step = feed(&mut session, Shot::Sample(0.10));
            assert!(matches!(step.outcome, CaptureOutcome::Rejected { .. }));
        }
        assert_eq!(session.captured(), 1);
    }

    #[test]
    fn missing_face_breaks_retry_run() {
        let mut session = EnrollmentSession::default();
        feed(&mut session, Shot::Sample(0.0));
        for _ in 0..9 {
            feed(&mut session, Shot::Sample(0.10));
        }
        feed(&mut session, Shot::Faces(0));
        let step = feed(&mut session, Shot::Sample(0.10));
        assert!(matches!(
            step.outcome,
            CaptureOutcome::Rejected { reason: RejectReason::NearDuplicate, .. }
        ));
    }

    #[test]
    fn encoding_failure_counts_as_retry() {
        let mut session = EnrollmentSession::default();
        feed(&mut session, Shot::Sample(0.0));
        for _ in 0..10 {
            feed(&mut session, Shot::Unencodable);
        }
        let step = feed(&mut session, Shot::Sample(0.10));
        assert!(matches!(step.outcome, CaptureOutcome::Accepted { forced: true, .. }));
    }

    #[test]
    fn budget_exhaustion_with_four_samples_is_insufficient() {
        let mut session = EnrollmentSession::default();
        for i in 0..4 {
            feed(&mut session, Shot::Sample(i as f64));
        }
        while !session.state().is_terminal() {
            feed(&mut session, Shot::Faces(0));
        }
        assert_eq!(session.state(), EnrollmentState::Aborted);
        assert_eq!(session.attempts(), 60);
        match session.finish() {
            Err(EnrollmentError::InsufficientSamples { captured, required }) => {
                assert_eq!(captured, 4);
                assert_eq!(required, MIN_ENROLLED);
            }
            other => panic!("expected InsufficientSamples, got {other:?}"),
        }
    }

    #[test]
    fn budget_exhaustion_with_five_samples_is_degraded_success() {
        let mut session = EnrollmentSession::default();
        for i in 0..5 {
            feed(&mut session, Shot::Sample(i as f64));
        }
        while !session.state().is_terminal() {
            feed(&mut session, Shot::Faces(0));
        }
        assert_eq!(session.state(), EnrollmentState::Aborted);
        assert_eq!(session.finish().unwrap().len(), 5);
    }

    #[test]
    fn terminal_session_ignores_frames() {
        let mut session = EnrollmentSession::default();
        for i in 0..POSE_COUNT {
            feed(&mut session, Shot::Sample(i as f64));
        }
        let step = feed(&mut session, Shot::Sample(42.0));
        assert_eq!(step.outcome, CaptureOutcome::Ignored);
        assert_eq!(session.attempts(), POSE_COUNT as u32);
    }

    #[test]
    fn unfinished_session_cannot_be_finished() {
        let mut session = EnrollmentSession::default();
        for i in 0..5 {
            feed(&mut session, Shot::Sample(i as f64));
        }
        assert_eq!(session.state(), EnrollmentState::AwaitingFrame(5));
        assert!(matches!(
            session.finish(),
            Err(EnrollmentError::InProgress { captured: 5 })
        ));
    }
}
