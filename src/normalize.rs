//! Single-item loudness normalization
//!
//! Moves one item through the engine workspace: write the source into a
//! private input slot, run the filter/encode job, read back the output slot.
//! The slots live on the blocking task that runs the job, so they are
//! released when the job ends even if the awaiting caller has gone away.

use bytes::Bytes;

use crate::batch::AudioItem;
use crate::config::NormalizationConfig;
use crate::engine::{CodecEngine, EncodeJob, EngineRef};
use crate::error::{ItemError, ItemErrorKind};

/// Workspace paths used for one normalization job
pub fn slot_paths(job_id: u64) -> (String, String) {
    (
        format!("job-{}/input.mp3", job_id),
        format!("job-{}/output.mp3", job_id),
    )
}

/// Run one job end to end inside the engine workspace. Blocking.
fn run_in_workspace(
    engine: &dyn CodecEngine,
    name: &str,
    data: Bytes,
) -> Result<Bytes, ItemErrorKind> {
    let workspace = engine.workspace();
    let (input_path, output_path) = slot_paths(workspace.next_job_id());

    let mut input_slot = workspace.claim(input_path.as_str())?;
    let output_slot = workspace.claim(output_path.as_str())?;

    let input_bytes = data.len();
    input_slot.write(data);

    let job = EncodeJob::new(input_path, output_path, &NormalizationConfig::STANDARD);
    tracing::debug!(
        name,
        input = %job.input,
        bytes = input_bytes,
        "Running normalization job"
    );

    engine.run(&job)?;

    let output = output_slot.read()?;
    if output.is_empty() {
        return Err(ItemErrorKind::EmptyOutput);
    }
    Ok(output)
}

/// Normalize one item to the standard loudness target and re-encode it.
pub async fn normalize(engine: &EngineRef, item: &AudioItem) -> Result<Bytes, ItemError> {
    if item.data.is_empty() {
        return Err(ItemError::new(&item.name, ItemErrorKind::MissingInput));
    }

    let runner = engine.clone();
    let name = item.name.clone();
    let data = item.data.clone();
    let output = tokio::task::spawn_blocking(move || run_in_workspace(runner.as_ref(), &name, data))
        .await
        .map_err(|e| ItemError::new(&item.name, ItemErrorKind::Join(e.to_string())))?
        .map_err(|kind| ItemError::new(&item.name, kind))?;

    tracing::debug!(
        name = %item.name,
        input_bytes = item.data.len(),
        output_bytes = output.len(),
        "Normalized item"
    );

    Ok(output)
}
