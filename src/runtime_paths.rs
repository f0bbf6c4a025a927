use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn platform_app_root() -> PathBuf {
    if let Some(project_dirs) = ProjectDirs::from("", "", "gemini-relay") {
        return project_dirs.data_dir().to_path_buf();
    }

    if let Some(base_dirs) = BaseDirs::new() {
        return base_dirs.data_local_dir().join("gemini-relay");
    }

    std::env::temp_dir().join("gemini-relay")
}

pub fn app_root() -> PathBuf {
    platform_app_root()
}

/// Default directory for per-user transcript files.
pub fn default_transcript_dir() -> String {
    app_root()
        .join("transcripts")
        .to_string_lossy()
        .to_string()
}
