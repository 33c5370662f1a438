//! Input and output files.
//!
//! Relative names resolve against the handler's root directory; absolute
//! paths are used as given.

use crate::error::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader};

/// Opens the import input and writes the report.
#[derive(Debug, Clone)]
pub struct FileHandler {
    root: PathBuf,
}

impl Default for FileHandler {
    fn default() -> Self {
        Self::new(".")
    }
}

impl FileHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    /// Opens `name` for buffered reading.
    pub async fn open_read(&self, name: impl AsRef<Path>) -> Result<BufReader<File>> {
        let file = File::open(self.resolve(name))
            .await
            .map_err(|e| Error::with_source(ErrorKind::ReadInputFile, e))?;
        Ok(BufReader::new(file))
    }

    /// Creates (or truncates) `name` and writes `data` to it.
    ///
    /// The file is flushed but left open for the caller.
    pub async fn create_write(&self, name: impl AsRef<Path>, data: &str) -> Result<File> {
        let path = self.resolve(name);
        let mut file = File::create(&path)
            .await
            .map_err(|e| Error::with_source(ErrorKind::CreateFile, e))?;

        file.write_all(data.as_bytes())
            .await
            .map_err(|e| Error::with_source(ErrorKind::WriteFile, e))?;
        file.flush()
            .await
            .map_err(|e| Error::with_source(ErrorKind::WriteFile, e))?;

        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ipcounter-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_open_read() {
        let dir = temp_dir("read");
        let data = "192.168.0.1\n192.168.0.2";
        std::fs::write(dir.join("input.txt"), data).unwrap();

        let handler = FileHandler::new(&dir);
        let mut reader = handler.open_read("input.txt").await.unwrap();

        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, data);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_open_read_missing() {
        let handler = FileHandler::new(temp_dir("missing"));
        let err = handler.open_read("nonexistent.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadInputFile);
    }

    #[tokio::test]
    async fn test_create_write() {
        let dir = temp_dir("write");
        let data = "192.168.1.1, count=1\n";

        let handler = FileHandler::default();
        let path = dir.join("output.txt");
        handler.create_write(&path, data).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), data);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_create_write_invalid_name() {
        let handler = FileHandler::new(temp_dir("invalid"));
        let err = handler.create_write("", "data").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CreateFile);
    }
}
