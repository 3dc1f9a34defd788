use std::path::{Path, PathBuf};

use flux_core::types::{JobId, Runtime};

/// Reduce a job name to characters that are safe in a file name.
///
/// Keeps alphanumerics, spaces, underscores and hyphens, then trims.
pub fn slug(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// `<scripts_dir>/<slug(name)>_<id><ext>`: unique per job id.
pub fn script_path(scripts_dir: &Path, name: &str, id: JobId, runtime: Runtime) -> PathBuf {
    scripts_dir.join(format!(
        "{}_{}{}",
        slug(name),
        id,
        runtime.script_extension()
    ))
}

/// Write the job's current source, replacing any previous version.
pub async fn write_script(path: &Path, source: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, source).await
}
