//! Live verification against an enrolled profile.
//!
//! A frame counts toward the verdict only when its best distance is within
//! tolerance, the mean distance over the whole profile is plausible, and the
//! recent best distances are stable. A run of `required_matches` such frames
//! verifies; `max_attempts` frames without one fails.

use std::collections::VecDeque;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::CodecError;
use crate::embedding::EnrollmentSet;
use crate::provider::{CaptureError, EmbeddingProvider};

/// Best distances kept for the stability check.
pub const DISTANCE_HISTORY: usize = 5;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error(transparent)]
    MalformedProfile(#[from] CodecError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("invalid verification parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationParams {
    /// Largest accepted best distance; lower is stricter.
    pub tolerance: f64,
    pub required_matches: u32,
    pub max_attempts: u32,
    /// Spread of recent best distances above which readings are volatile.
    pub distance_variance_threshold: f64,
    /// Mean distance must stay below `tolerance * average_distance_factor`.
    pub average_distance_factor: f64,
    pub jitters: u32,
}

impl Default for VerificationParams {
    fn default() -> Self {
        Self {
            tolerance: 0.45,
            required_matches: 5,
            max_attempts: 40,
            distance_variance_threshold: 0.03,
            average_distance_factor: 1.3,
            jitters: 2,
        }
    }
}

impl VerificationParams {
    /// Rejects values under which a frame could match without being compared,
    /// e.g. a NaN tolerance or a zero-length run.
    pub fn validate(&self) -> Result<(), VerificationError> {
        positive("tolerance", self.tolerance)?;
        positive("average_distance_factor", self.average_distance_factor)?;
        positive("distance_variance_threshold", self.distance_variance_threshold)?;
        if self.required_matches == 0 {
            return Err(invalid("required_matches", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), VerificationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("{value} is not a finite positive number")))
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> VerificationError {
    VerificationError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    ConsistentMatch,
    InconsistentMatch,
    NoMatch,
    NoFace,
    MultiFace,
    /// One face was found but could not be encoded.
    EncodingFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    Sampling,
    Verified,
    Failed,
}

impl VerificationState {
    pub fn is_terminal(self) -> bool {
        self != VerificationState::Sampling
    }
}

/// Distances measured for a frame with exactly one encoded face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDistances {
    pub min: f64,
    pub avg: f64,
    /// `max - min` over the distance history, this frame included.
    pub variance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationStep {
    /// `None` once the session has terminated.
    pub class: Option<FrameClass>,
    pub distances: Option<FrameDistances>,
    pub consecutive_matches: u32,
    pub state: VerificationState,
}

pub struct VerificationSession {
    params: VerificationParams,
    enrolled: EnrollmentSet,
    attempts: u32,
    consecutive_matches: u32,
    history: VecDeque<f64>,
    state: VerificationState,
}

impl VerificationSession {
    pub fn new(
        enrolled: EnrollmentSet,
        params: VerificationParams,
    ) -> Result<Self, VerificationError> {
        params.validate()?;
        Ok(Self {
            params,
            enrolled,
            attempts: 0,
            consecutive_matches: 0,
            history: VecDeque::with_capacity(DISTANCE_HISTORY),
            state: VerificationState::Sampling,
        })
    }

    pub fn state(&self) -> VerificationState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn consecutive_matches(&self) -> u32 {
        self.consecutive_matches
    }

    /// `Some(true)` once verified, `Some(false)` once failed.
    pub fn verdict(&self) -> Option<bool> {
        match self.state {
            VerificationState::Sampling => None,
            VerificationState::Verified => Some(true),
            VerificationState::Failed => Some(false),
        }
    }

    pub fn advance<P>(&mut self, frame: &P::Frame, provider: &mut P) -> VerificationStep
    where
        P: EmbeddingProvider,
    {
        if self.state.is_terminal() {
            return self.step(None, None);
        }

        self.attempts += 1;
        let (class, distances) = self.evaluate(frame, provider);

        if self.consecutive_matches >= self.params.required_matches {
            info!(
                "verified after {} frames ({} consecutive matches)",
                self.attempts, self.consecutive_matches
            );
            self.state = VerificationState::Verified;
        } else if self.attempts >= self.params.max_attempts {
            info!(
                "verification failed: {} frames without {} consistent matches",
                self.attempts, self.params.required_matches
            );
            self.state = VerificationState::Failed;
        }

        self.step(Some(class), distances)
    }

    fn step(&self, class: Option<FrameClass>, distances: Option<FrameDistances>) -> VerificationStep {
        VerificationStep {
            class,
            distances,
            consecutive_matches: self.consecutive_matches,
            state: self.state,
        }
    }

    fn evaluate<P>(&mut self, frame: &P::Frame, provider: &mut P) -> (FrameClass, Option<FrameDistances>)
    where
        P: EmbeddingProvider,
    {
        let faces = match provider.detect_faces(frame) {
            Ok(faces) => faces,
            Err(err) => {
                debug!("frame {}: {}", self.attempts, err);
                Vec::new()
            }
        };

        let face = match faces.as_slice() {
            [face] => *face,
            others => {
                self.consecutive_matches = 0;
                self.history.clear();
                let class = if others.is_empty() {
                    FrameClass::NoFace
                } else {
                    FrameClass::MultiFace
                };
                debug!("frame {}: {:?}", self.attempts, class);
                return (class, None);
            }
        };

        let probe = match provider.compute_embedding(frame, &face, self.params.jitters) {
            Ok(probe) => probe,
            Err(err) => {
                debug!("frame {}: {}", self.attempts, err);
                return (FrameClass::EncodingFailed, None);
            }
        };

        let mut min = f64::INFINITY;
        let mut total = 0.0;
        for known in &self.enrolled {
            let distance = provider.distance(known, &probe);
            total += distance;
            min = min.min(distance);
        }
        let avg = total / self.enrolled.len() as f64;

        if self.history.len() == DISTANCE_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(min);
        let variance = spread(&self.history);

        let params = &self.params;
        let class = if min > params.tolerance {
            self.consecutive_matches = 0;
            FrameClass::NoMatch
        } else if avg >= params.tolerance * params.average_distance_factor {
            FrameClass::InconsistentMatch
        } else if variance >= params.distance_variance_threshold && self.consecutive_matches >= 2 {
            FrameClass::InconsistentMatch
        } else {
            self.consecutive_matches += 1;
            FrameClass::ConsistentMatch
        };

        debug!(
            "frame {}: {:?} min={:.4} avg={:.4} var={:.4} run={}/{}",
            self.attempts,
            class,
            min,
            avg,
            variance,
            self.consecutive_matches,
            self.params.required_matches
        );

        (class, Some(FrameDistances { min, avg, variance }))
    }
}

fn spread(history: &VecDeque<f64>) -> f64 {
    if history.is_empty() {
        return f64::INFINITY;
    }
    let max = history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = history.iter().copied().fold(f64::INFINITY, f64::min);
    max - min
}
