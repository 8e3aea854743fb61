//! Zeno progress illusion
//!
//! Long-running jobs report coarse, bursty progress; mirroring that literally
//! reads as "stuck". This module maps real progress to a display value that
//! always advances while work is running, asymptotically approaches 90 while
//! real progress sits below 100, and snaps to the truth on completion.

use crate::poller::JobStatus;
use crate::staging::FileStatus;

/// Visual ceiling while real progress has not reached 100.
pub const CEILING: f64 = 90.0;
/// Proportional gain of the approach step.
pub const GAIN: f64 = 0.05;
/// Minimum per-tick advance, so the bar never visibly stalls.
pub const MIN_STEP: f64 = 0.02;

/// Coarse phase the illusion cares about, derived from either the per-file
/// or the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZenoPhase {
    Idle,
    Running,
    Complete,
    Failed,
}

impl From<FileStatus> for ZenoPhase {
    fn from(status: FileStatus) -> Self {
        match status {
            FileStatus::Staged => ZenoPhase::Idle,
            FileStatus::Uploading => ZenoPhase::Running,
            FileStatus::Complete => ZenoPhase::Complete,
            FileStatus::Error => ZenoPhase::Failed,
        }
    }
}

impl From<JobStatus> for ZenoPhase {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Idle => ZenoPhase::Idle,
            JobStatus::Pending | JobStatus::Processing => ZenoPhase::Running,
            JobStatus::Completed => ZenoPhase::Complete,
            JobStatus::Failed | JobStatus::Timeout => ZenoPhase::Failed,
        }
    }
}

/// One animation tick of the illusion.
///
/// `real` is the authoritative progress (0..=100), `previous` the last visual
/// value. Idle resets to 0, completion snaps to 100, failure freezes the bar
/// (the caller signals failure through color, not motion).
pub fn visual_progress(real: f64, phase: ZenoPhase, previous: f64) -> f64 {
    match phase {
        ZenoPhase::Idle => 0.0,
        ZenoPhase::Complete => 100.0,
        ZenoPhase::Failed => previous,
        ZenoPhase::Running => advance(real, previous),
    }
}

fn advance(real: f64, previous: f64) -> f64 {
    let target = if real >= 100.0 {
        100.0
    } else {
        // Creep past stalled real progress, but never through the ceiling.
        real.max(previous + MIN_STEP).min(CEILING)
    };

    let distance = target - previous;
    if distance <= 0.0 {
        return previous.min(100.0);
    }

    // Proportional approach with a minimum crawl, capped at half the
    // remaining distance so the sequence stays strictly below the target.
    let step = (GAIN * distance).max(MIN_STEP).min(distance / 2.0);
    (previous + step).min(100.0)
}
