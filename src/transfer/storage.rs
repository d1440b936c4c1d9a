// Local download target
// Picks a free file name and removes the partial file unless finished
// RAII guard is used for cleanups on Error

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

pub struct LocalDownload {
    file: File,
    path: PathBuf,
    written: u64,
    disarmed: bool, // false -> delete file on drop
}

impl LocalDownload {
    /// Create `dir/name`, or `name (1).ext`, `name (2).ext`, ... if taken.
    pub async fn create(dir: &Path, name: &str) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let candidate = Path::new(name);
        let stem = candidate
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("download")
            .to_string();
        let extension = candidate
            .extension()
            .and_then(|s| s.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();

        let mut path = dir.join(name);
        let mut counter = 1;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    return Ok(Self {
                        file,
                        path,
                        written: 0,
                        disarmed: false,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    path = dir.join(format!("{stem} ({counter}){extension}"));
                    counter += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush and keep the file. Returns its final path.
    pub async fn finish(mut self) -> io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        self.disarmed = true;
        Ok(self.path.clone())
    }
}

// if disarmed is false the partial file is deleted
impl Drop for LocalDownload {
    fn drop(&mut self) {
        if !self.disarmed {
            // Drop is sync; removing one file is quick
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to clean up partial download"
                );
            } else {
                tracing::debug!(path = %self.path.display(), "Removed partial download");
            }
        }
    }
}
