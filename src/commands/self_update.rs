use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::executor::UpdatePipeline;
use crate::models::{AttemptStatus, DownloadOutcome, UpdateStage};
use crate::utils::AppResult;

fn prompt_for(stage: UpdateStage) -> &'static str {
    match stage {
        UpdateStage::PermissionCheck => {
            "Storage access is required to download the update. Grant it, then press Enter."
        }
        UpdateStage::InstallPrompt => {
            "Installing updates from this source is not allowed yet. \
             Run `pos-agent allow-install`, then press Enter."
        }
        _ => "Press Enter to continue.",
    }
}

/// Drive one update attempt to completion, waiting on `operator` whenever the
/// pipeline suspends. Closing the input cancels the attempt.
pub async fn run_self_update<R>(pipeline: &UpdatePipeline, operator: &mut R) -> AppResult<AttemptStatus>
where
    R: AsyncBufRead + Unpin,
{
    let mut status = pipeline.start().await?;

    while let AttemptStatus::Suspended(stage) = status {
        println!("{}", prompt_for(stage));
        let mut line = String::new();
        let read = operator.read_line(&mut line).await?;
        if read == 0 {
            log::info!("Operator input closed while waiting at {}", stage.as_str());
            pipeline.cancel().await;
            return Ok(AttemptStatus::Finished {
                outcome: DownloadOutcome::Cancelled,
                details: format!("Cancelled during {}", stage.as_str()),
            });
        }
        status = pipeline.resume().await?;
    }

    if let AttemptStatus::Finished { outcome, details } = &status {
        if outcome.is_success() {
            log::info!("Self-update handed to installer: {}", details);
        } else {
            log::warn!("Self-update ended with {}: {}", outcome.code(), details);
        }
    }
    Ok(status)
}
