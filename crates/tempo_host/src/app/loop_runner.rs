use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

use super::bootstrap::Host;
use super::session::{GameplaySession, SessionSettings};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) frames: u64,
    pub(crate) fired: u64,
    pub(crate) loop_guard_frames: u64,
}

pub(crate) fn run(host: Host) -> ExitCode {
    let settings = SessionSettings::from(&host.config);
    let mut session = GameplaySession::new(host.scheduler, host.source, settings);

    session.enter();
    let summary = run_frames(
        &mut session,
        target_frame_duration(host.config.frame_hz),
        host.config.run_for,
    );
    info!(
        frames = summary.frames,
        fired = summary.fired,
        loop_guard_frames = summary.loop_guard_frames,
        heartbeats = session.heartbeats(),
        autosaves = session.autosaves(),
        game_time = %session.clock().current_time_string(),
        "run_finished"
    );

    if let Err(err) = session.leave() {
        error!(error = %err, "final_save_failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Drives the session at most once per `frame_target` until `run_for` has
/// elapsed. An active session always gets at least one frame.
pub(crate) fn run_frames(
    session: &mut GameplaySession,
    frame_target: Option<Duration>,
    run_for: Duration,
) -> RunSummary {
    let started = Instant::now();
    let mut summary = RunSummary::default();

    while session.is_active() {
        let frame_start = Instant::now();
        let report = session.update();
        summary.frames += 1;
        summary.fired += u64::from(report.fired);
        if report.loop_guard_hit {
            summary.loop_guard_frames += 1;
        }

        if started.elapsed() >= run_for {
            break;
        }

        let cap_sleep = compute_cap_sleep(frame_start.elapsed(), frame_target);
        if cap_sleep > Duration::ZERO {
            thread::sleep(cap_sleep);
        }
    }

    summary
}

fn target_frame_duration(frame_hz: Option<u32>) -> Option<Duration> {
    frame_hz.map(|hz| Duration::from_secs_f64(1.0 / hz as f64))
}

fn compute_cap_sleep(elapsed: Duration, target: Option<Duration>) -> Duration {
    match target {
        Some(frame_target) if elapsed < frame_target => frame_target - elapsed,
        _ => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use tempo::{EventScheduler, ManualTimeSource, TimeSource, VirtualClock};

    use super::*;

    #[test]
    fn target_frame_duration_none_when_uncapped() {
        assert_eq!(target_frame_duration(None), None);
    }

    #[test]
    fn target_frame_duration_for_60hz_is_expected() {
        let duration = target_frame_duration(Some(60)).expect("duration");
        assert!((duration.as_secs_f64() - (1.0 / 60.0)).abs() < 0.000_001);
    }

    #[test]
    fn cap_sleep_zero_when_over_budget() {
        let sleep = compute_cap_sleep(Duration::from_millis(20), target_frame_duration(Some(60)));
        assert_eq!(sleep, Duration::ZERO);
    }

    #[test]
    fn cap_sleep_fills_remaining_budget() {
        let sleep = compute_cap_sleep(Duration::from_millis(5), Some(Duration::from_millis(16)));
        assert_eq!(sleep, Duration::from_millis(11));
    }

    #[test]
    fn zero_run_time_still_runs_one_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source: Rc<dyn TimeSource> = Rc::new(ManualTimeSource::new(0));
        let clock = Rc::new(VirtualClock::new(Rc::clone(&source)));
        let scheduler = Rc::new(EventScheduler::new(clock));
        let settings = SessionSettings {
            save_path: dir.path().join("clock.json"),
            autosave_interval: Duration::from_secs(5),
            heartbeat_seconds: 1.0,
        };
        let mut session = GameplaySession::new(scheduler, source, settings);
        session.enter();

        let summary = run_frames(&mut session, None, Duration::ZERO);

        assert_eq!(summary.frames, 1);
        assert_eq!(summary.fired, 0);
    }
}
