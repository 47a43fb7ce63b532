//! Regular-file descriptors over the FAT32 provider
//!
//! Sector-buffered sequential access: reads are satisfied from a one-sector
//! cache that is refilled whenever the cursor crosses a sector boundary.
//! The provider is read-only, so writes fail with `EIO`.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::fat32::Fat32;
use super::FileContext;
use crate::error::{Errno, SysResult};

struct Cursor {
    pos: usize,
    last_sector: Option<usize>,
    buffer: Vec<u8>,
    buffered: usize,
}

/// An open file on the RAM filesystem.
pub struct Fat32FileContext {
    fs: Arc<Fat32>,
    path: String,
    cursor: Mutex<Cursor>,
}

impl Fat32FileContext {
    pub fn open(fs: Arc<Fat32>, path: &str) -> Self {
        let sector_size = fs.sector_size();
        Self {
            fs,
            path: String::from(path),
            cursor: Mutex::new(Cursor {
                pos: 0,
                last_sector: None,
                buffer: vec![0; sector_size],
                buffered: 0,
            }),
        }
    }
}

impl FileContext for Fat32FileContext {
    fn read(&self, buf: &mut [u8]) -> SysResult<usize> {
        let sector_size = self.fs.sector_size();
        let size = self.fs.file_size(&self.path).map_err(|_| Errno::Io)?;

        let mut cursor = self.cursor.lock();
        if cursor.pos >= size {
            return Err(Errno::Eof);
        }
        let wanted = buf.len().min(size - cursor.pos);

        let mut count = 0;
        while count < wanted {
            let sector = cursor.pos / sector_size;
            let offset = cursor.pos % sector_size;
            if cursor.last_sector != Some(sector) {
                let Cursor {
                    buffer,
                    buffered,
                    last_sector,
                    ..
                } = &mut *cursor;
                match self.fs.read_file(&self.path, sector, buffer) {
                    Ok(n) => {
                        *buffered = n;
                        *last_sector = Some(sector);
                    }
                    Err(_) => break,
                }
            }
            let available = cursor.buffered.saturating_sub(offset);
            if available == 0 {
                break;
            }
            let chunk = available.min(wanted - count);
            buf[count..count + chunk].copy_from_slice(&cursor.buffer[offset..offset + chunk]);
            count += chunk;
            cursor.pos += chunk;
        }
        Ok(count)
    }

    fn write(&self, _buf: &[u8]) -> SysResult<usize> {
        Err(Errno::Io)
    }

    fn duplicate(&self) -> Arc<dyn FileContext> {
        let copy = Fat32FileContext::open(self.fs.clone(), &self.path);
        copy.cursor.lock().pos = self.cursor.lock().pos;
        Arc::new(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat32::tests::build_test_image;

    fn mount() -> Arc<Fat32> {
        Arc::new(Fat32::from_slice(build_test_image(b"#!init")).unwrap())
    }

    #[test]
    fn sequential_reads_cross_sector_boundaries() {
        let file = Fat32FileContext::open(mount(), "/HELLO.TXT");
        let mut all = Vec::new();
        let mut buf = [0u8; 100];
        loop {
            match file.read(&mut buf) {
                Ok(n) => all.extend_from_slice(&buf[..n]),
                Err(Errno::Eof) => break,
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        assert_eq!(all.len(), 600);
        for (i, &b) in all.iter().enumerate() {
            assert_eq!(b, (i % 251) as u8, "byte {}", i);
        }
    }

    #[test]
    fn read_past_end_is_eof() {
        let file = Fat32FileContext::open(mount(), "/bin/init");
        let mut buf = [0u8; 32];
        assert_eq!(file.read(&mut buf), Ok(6));
        assert_eq!(&buf[..6], b"#!init");
        assert_eq!(file.read(&mut buf), Err(Errno::Eof));
    }

    #[test]
    fn writes_are_rejected() {
        let file = Fat32FileContext::open(mount(), "/bin/init");
        assert_eq!(file.write(b"nope"), Err(Errno::Io));
    }

    #[test]
    fn duplicate_copies_the_cursor() {
        let file = Fat32FileContext::open(mount(), "/HELLO.TXT");
        let mut buf = [0u8; 10];
        file.read(&mut buf).unwrap();

        let copy = file.duplicate();
        let mut a = [0u8; 10];
        let mut b = [0u8; 10];
        // Both cursors continue from byte 10, independently.
        assert_eq!(file.read(&mut a), Ok(10));
        assert_eq!(copy.read(&mut b), Ok(10));
        assert_eq!(a, b);
    }
}
