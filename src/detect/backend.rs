use anyhow::Result;

use crate::detect::result::Detection;

/// Source of per-frame detections.
///
/// # Collaborator Boundary
///
/// Inference lives outside this crate. Implementations wrap whatever model
/// runtime the deployment uses and hand back one detection list per frame.
/// The pipeline never inspects pixels and never calls back into the source.
pub trait DetectionSource: Send {
    /// Source identifier.
    fn name(&self) -> &'static str;

    /// Detections for the next frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Vec<Detection>>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
