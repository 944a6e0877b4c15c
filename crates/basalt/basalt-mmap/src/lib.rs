use memmap2::{MmapMut, MmapOptions};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("requested view of {requested} bytes exceeds the {available}-byte backing file")]
    ViewTooLarge { requested: u64, available: u64 },
}

/// A read-write shared mapping, either backed by a file or anonymous.
pub struct MmapFileMut {
    _file: Option<File>,
    mmap: MmapMut,
}

impl MmapFileMut {
    /// Create a new file of `size_bytes` and map it read-write
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            _file: Some(file),
            mmap,
        })
    }

    /// Map `size_bytes` of zeroed memory not backed by any file.
    ///
    /// The mapping is shared with threads of this process only.
    pub fn anonymous(size_bytes: usize) -> io::Result<Self> {
        let mmap = MmapOptions::new().len(size_bytes).map_anon()?;
        Ok(Self { _file: None, mmap })
    }

    /// Open an existing file and map all of it read-write
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            _file: Some(file),
            mmap,
        })
    }

    /// Open an existing file and map its first `len` bytes read-write.
    ///
    /// A view longer than the file is refused rather than truncated: touching
    /// pages past the end of the file would fault or expose unrelated memory.
    pub fn open_rw_view<P: AsRef<Path>>(path: P, len: usize) -> Result<Self, MapError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let available = file.metadata()?.len();
        if len as u64 > available {
            return Err(MapError::ViewTooLarge {
                requested: len as u64,
                available,
            });
        }

        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file)? };

        Ok(Self {
            _file: Some(file),
            mmap,
        })
    }

    /// Return raw pointer to start of memory mapped file data
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_sees_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let mut a = MmapFileMut::create_rw(&path, 8192).unwrap();
        assert_eq!(a.len(), 8192);
        unsafe { a.as_mut_ptr().add(100).write(0xAB) };

        let mut b = MmapFileMut::open_rw(&path).unwrap();
        assert_eq!(b.len(), 8192);
        assert_eq!(unsafe { b.as_mut_ptr().add(100).read() }, 0xAB);
    }

    #[test]
    fn view_within_file_is_granted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let _owner = MmapFileMut::create_rw(&path, 8192).unwrap();

        let view = MmapFileMut::open_rw_view(&path, 4096).unwrap();
        assert_eq!(view.len(), 4096);
    }

    #[test]
    fn view_past_end_of_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let _owner = MmapFileMut::create_rw(&path, 8192).unwrap();

        match MmapFileMut::open_rw_view(&path, 8193) {
            Err(MapError::ViewTooLarge {
                requested,
                available,
            }) => {
                assert_eq!(requested, 8193);
                assert_eq!(available, 8192);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("oversized view was granted"),
        }
    }

    #[test]
    fn anonymous_mapping_is_zeroed() {
        let mut m = MmapFileMut::anonymous(4096).unwrap();
        assert!(!m.is_empty());
        let p = m.as_mut_ptr();
        assert!((0..4096).all(|i| unsafe { p.add(i).read() } == 0));
    }
}
