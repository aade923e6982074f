use crate::run_state::RunState;
use gust_core::prelude::DelegatedShutdownListener;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use std::cmp::min;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

/// Displays a progress bar while the test is running to show the user how long is left and how
/// many VUs are active.
pub(crate) fn start_progress(
    run_state: Arc<RunState>,
    mut shutdown_listener: DelegatedShutdownListener,
) -> anyhow::Result<()> {
    let planned_runtime = run_state.schedule().total_duration();
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}] {msg}",
    )?
    .with_key("planned_runtime", {
        let hours = planned_runtime.as_secs() / 3600;
        let minutes = (planned_runtime.as_secs() % 3600) / 60;
        let seconds = planned_runtime.as_secs() % 60;
        move |_state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds);
        }
    })
    .progress_chars("#>-");

    std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let pb = ProgressBar::new(planned_runtime.as_secs());
            pb.set_style(style);

            loop {
                if shutdown_listener.should_shutdown() {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }

                let new = min(run_state.elapsed().as_secs(), planned_runtime.as_secs());
                pb.set_position(new);
                pb.set_message(format!(
                    "{}/{} VUs",
                    run_state.active_vus(),
                    run_state.current_target()
                ));
                std::thread::sleep(Duration::from_millis(500));
            }
        })?;

    Ok(())
}
