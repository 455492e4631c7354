//! Resolution of transient job states from the files underneath.

use crate::model::{FileStatus, JobStatus};

/// Next job status given the current one, the statuses of its selected
/// files, whether every selected file is done, and whether its engine still
/// has queued or transferring work.
pub fn infer_status(
    current: JobStatus,
    files: &[FileStatus],
    complete: bool,
    active: bool,
) -> JobStatus {
    if complete {
        return JobStatus::Completed;
    }
    let idle = if active {
        JobStatus::Running
    } else {
        JobStatus::NotRunning
    };
    match current {
        JobStatus::Stopping => {
            let winding_down = files
                .iter()
                .any(|s| matches!(s, FileStatus::Downloading | FileStatus::Stopping));
            if winding_down {
                JobStatus::Stopping
            } else {
                JobStatus::NotRunning
            }
        }
        JobStatus::Starting => {
            let pending = files.iter().any(|s| {
                matches!(s, FileStatus::Failed | FileStatus::Stopped | FileStatus::New)
            });
            if pending {
                idle
            } else {
                JobStatus::Running
            }
        }
        _ => idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FileStatus::*;

    #[test]
    fn completion_wins_over_everything() {
        for current in [JobStatus::Starting, JobStatus::Stopping, JobStatus::Running] {
            assert_eq!(
                infer_status(current, &[Completed, Downloading], true, true),
                JobStatus::Completed
            );
        }
    }

    #[test]
    fn starting_becomes_running_once_nothing_is_pending() {
        assert_eq!(
            infer_status(JobStatus::Starting, &[Queued, Downloading, Completed], false, true),
            JobStatus::Running
        );
        assert_eq!(
            infer_status(JobStatus::Starting, &[Queued, New], false, true),
            JobStatus::Running
        );
        assert_eq!(
            infer_status(JobStatus::Starting, &[Failed, Downloading], false, true),
            JobStatus::Running
        );
        assert_eq!(
            infer_status(JobStatus::Starting, &[Failed], false, false),
            JobStatus::NotRunning
        );
    }

    #[test]
    fn stopping_waits_for_transfers_to_wind_down() {
        assert_eq!(
            infer_status(JobStatus::Stopping, &[Stopping, Stopped], false, true),
            JobStatus::Stopping
        );
        assert_eq!(
            infer_status(JobStatus::Stopping, &[Stopped, Queued], false, true),
            JobStatus::NotRunning
        );
    }

    #[test]
    fn steady_states_follow_engine_activity() {
        assert_eq!(
            infer_status(JobStatus::NotRunning, &[Queued], false, true),
            JobStatus::Running
        );
        assert_eq!(
            infer_status(JobStatus::Running, &[Failed], false, false),
            JobStatus::NotRunning
        );
        assert_eq!(
            infer_status(JobStatus::Completed, &[Invalid], false, false),
            JobStatus::NotRunning
        );
    }
}
