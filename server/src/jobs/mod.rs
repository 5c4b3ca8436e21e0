//! Background tasks and scheduled jobs.
//!
//! Each submodule provides a long-running `run` function intended to be
//! spawned via `tokio::spawn`, plus a `tick` that does one pass and is what
//! the tests drive. All tasks stop when their [`CancellationToken`] fires.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::state::AppState;

pub mod reminders;
pub mod reveal;

pub fn spawn_all(state: &AppState, config: &Config, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(reveal::run(
            state.clone(),
            config.reveal_job_interval,
            cancel.clone(),
        )),
        tokio::spawn(reminders::run(
            state.clone(),
            config.reminder_job_interval,
            cancel.clone(),
        )),
    ]
}
