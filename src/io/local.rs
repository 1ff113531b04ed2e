use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ByteRange, RangeFetcher};
use crate::error::{Error, Result};

/// Positional reader over a local file.
///
/// Lets the same archive code serve local archives and gives tests a
/// ground-truth copy to compare remote reads against.
pub struct LocalFileFetcher {
    file: Arc<std::fs::File>,
    size: u64,
    closed: AtomicBool,
}

impl LocalFileFetcher {
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            size,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RangeFetcher for LocalFileFetcher {
    async fn fetch(&self, range: ByteRange) -> Result<Bytes> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::UseAfterClose);
        }
        if range.end() > self.size {
            return Err(Error::corrupt(format!(
                "range {range} is beyond the end of a {} byte file",
                self.size
            )));
        }

        let file = Arc::clone(&self.file);
        let data = tokio::task::spawn_blocking(move || read_exact_at(&file, range))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(Bytes::from(data))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn read_exact_at(file: &std::fs::File, range: ByteRange) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; range.len() as usize];

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(&mut buf, range.start())?;
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.seek_read(&mut buf[filled..], range.start() + filled as u64)?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = file;
        file.seek(SeekFrom::Start(range.start()))?;
        file.read_exact(&mut buf)?;
    }

    Ok(buf)
}
