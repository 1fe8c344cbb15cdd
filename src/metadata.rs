use crate::config::GearManifest;
use crate::domain::Subject;
use crate::error::GearError;
use crate::naming::gear_name;
use crate::platform::PlatformClient;
use crate::progress::ProgressSink;

/// Tags the subject with `<label>:<version>` unless it already carries it.
/// Returns whether a tag was added.
pub fn update_subject_tags(
    client: &dyn PlatformClient,
    subject: &Subject,
    manifest: &GearManifest,
    sink: &dyn ProgressSink,
) -> Result<bool, GearError> {
    let tag = gear_name(manifest);
    if subject.tags.iter().any(|existing| *existing == tag) {
        sink.debug(format!("Subject already tagged with '{tag}'"));
        return Ok(false);
    }
    client.add_subject_tag(subject, &tag)?;
    sink.info(format!("Subject's tags now include '{tag}'"));
    Ok(true)
}
