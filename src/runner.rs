use std::time::Duration;

use log::info;

use crate::codec::{self, EncodedProfile};
use crate::enrollment::{
    CaptureOutcome, EnrollmentError, EnrollmentPolicy, EnrollmentSession, POSE_COUNT,
};
use crate::provider::{EmbeddingProvider, FrameSource};
use crate::quality::QualityGate;
use crate::verification::{VerificationError, VerificationParams, VerificationSession};

/// Delays the caller loop inserts between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pacing {
    /// After every examined frame.
    pub frame_delay: Duration,
    /// After an accepted enrollment sample, so the subject can change pose.
    pub capture_delay: Duration,
}

impl Pacing {
    fn pause(delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrollmentOptions {
    pub policy: EnrollmentPolicy,
    pub quality: QualityGate,
    pub pacing: Pacing,
}

/// Drives an [`EnrollmentSession`] until it terminates and encodes the result.
pub fn run_enrollment<S, P, F>(
    source: &mut S,
    provider: &mut P,
    options: &EnrollmentOptions,
) -> Result<EncodedProfile, EnrollmentError>
where
    S: FrameSource<Frame = F>,
    P: EmbeddingProvider<Frame = F>,
{
    let mut session = EnrollmentSession::new(options.policy.clone(), options.quality);

    let mut announced = None;
    while let Some(pose) = session.current_pose() {
        if announced != Some(pose) {
            info!(
                "[{}/{}] {}",
                pose.index() + 1,
                POSE_COUNT,
                pose.instruction()
            );
            announced = Some(pose);
        }
        let frame = source.next_frame()?;
        let step = session.advance(&frame, provider);

        match step.outcome {
            CaptureOutcome::Accepted { .. } if !step.state.is_terminal() => {
                Pacing::pause(options.pacing.capture_delay);
            }
            _ => Pacing::pause(options.pacing.frame_delay),
        }
    }

    let set = session.finish()?;
    info!("enrolled {} face samples", set.len());
    Ok(codec::encode(&set))
}

/// Decodes `profile` and samples live frames until a verdict is reached.
///
/// Exhausting the attempt budget is `Ok(false)`, not an error.
pub fn run_verification<S, P, F>(
    source: &mut S,
    provider: &mut P,
    profile: &EncodedProfile,
    params: &VerificationParams,
    pacing: Pacing,
) -> Result<bool, VerificationError>
where
    S: FrameSource<Frame = F>,
    P: EmbeddingProvider<Frame = F>,
{
    params.validate()?;
    let enrolled = codec::decode(profile)?;
    info!(
        "verifying against {} enrolled samples (tolerance {:.2})",
        enrolled.len(),
        params.tolerance
    );
    let mut session = VerificationSession::new(enrolled, params.clone())?;

    loop {
        if let Some(verdict) = session.verdict() {
            return Ok(verdict);
        }
        let frame = source.next_frame()?;
        session.advance(&frame, provider);
        if !session.state().is_terminal() {
            Pacing::pause(pacing.frame_delay);
        }
    }
}
