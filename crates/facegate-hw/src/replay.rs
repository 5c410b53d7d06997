//! Replays still images from a directory as if they came from a camera.

use crate::frame::sniff_content_type;
use crate::source::{CapturedImage, FrameSource, SourceError};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Frame source backed by image files, returned in file-name order.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
}

impl DirectorySource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| SourceError::Disconnected(format!("{}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(SourceError::Disconnected(format!(
                "{}: no .jpg/.jpeg/.png files",
                dir.display()
            )));
        }

        tracing::info!(dir = %dir.display(), count = files.len(), "replay source opened");
        Ok(Self {
            dir,
            files,
            next: 0,
            looping: false,
        })
    }

    /// Start over from the first file once the directory is exhausted.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn grab(&mut self) -> Result<Option<CapturedImage>, SourceError> {
        if self.next >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.next = 0;
        }
        let path = &self.files[self.next];
        self.next += 1;

        let data = std::fs::read(path)
            .map_err(|e| SourceError::Transient(format!("{}: {e}", path.display())))?;
        let content_type = sniff_content_type(&data).ok_or_else(|| {
            SourceError::Transient(format!("{}: not a JPEG or PNG image", path.display()))
        })?;

        Ok(Some(CapturedImage { data, content_type }))
    }

    fn describe(&self) -> String {
        format!("replay of {} ({} images)", self.dir.display(), self.files.len())
    }
}
