// SPDX-License-Identifier: Apache-2.0

//! File identity that survives renames, used to notice rotation: the
//! device and inode pair stays with the open handle while the path moves
//! on to a new file.

use std::fs::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    pub fn from_metadata(metadata: &Metadata) -> FileId {
        use std::os::unix::fs::MetadataExt;

        FileId {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn stable_across_reopen() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"contents").unwrap();
        file.flush().unwrap();

        let id1 = FileId::from_metadata(&std::fs::metadata(file.path()).unwrap());
        let id2 = FileId::from_metadata(&std::fs::metadata(file.path()).unwrap());
        assert_eq!(id1, id2);
    }

    #[test]
    fn distinguishes_files() {
        let file1 = NamedTempFile::new().unwrap();
        let file2 = NamedTempFile::new().unwrap();

        let id1 = FileId::from_metadata(&std::fs::metadata(file1.path()).unwrap());
        let id2 = FileId::from_metadata(&std::fs::metadata(file2.path()).unwrap());
        assert_ne!(id1, id2);
    }

    #[test]
    fn changes_when_path_is_recreated() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let id1 = FileId::from_metadata(&std::fs::metadata(&path).unwrap());
        drop(file);

        std::fs::write(&path, b"new file at the old path").unwrap();
        let id2 = FileId::from_metadata(&std::fs::metadata(&path).unwrap());
        std::fs::remove_file(&path).unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn displays_as_dev_ino() {
        let id = FileId { dev: 123, ino: 456 };
        assert_eq!(format!("{}", id), "123:456");
    }
}
