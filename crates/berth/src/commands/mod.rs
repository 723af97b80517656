pub mod events;
pub mod exec;
pub mod lifecycle;
pub mod logs;
pub mod ps;
pub mod status;

use berth_core::ProcessStatus;
use colored::{ColoredString, Colorize};

pub(crate) fn colored_status(status: ProcessStatus) -> ColoredString {
    match status {
        ProcessStatus::Running => status.as_str().green(),
        ProcessStatus::ProcessStopped => status.as_str().yellow(),
        ProcessStatus::Error => status.as_str().red(),
        ProcessStatus::Exited | ProcessStatus::ContainerNotRunning | ProcessStatus::Unknown => {
            status.as_str().dimmed()
        }
    }
}
