use crate::config::ComputerParameters;
use crate::errors::{
    FileMapError,
    Result,
};
use memmap2::{
    Mmap,
    MmapOptions,
};
use std::fs::File;
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    debug,
    trace,
};

/// Sliding read-only memory map over a (potentially huge) file.
///
/// Only one window of the file is mapped at any time. Accesses that fall
/// outside of the current window unmap it and map a new one starting at
/// the enclosing block boundary. Because every accessor borrows the map
/// mutably, references into an old window cannot outlive a remap.
#[derive(Debug)]
pub struct WindowedFileMap {
    path: PathBuf,
    file: File,
    file_len: u64,
    block_size: u64,
    map_limit: u64,
    window_start: u64,
    mmap: Option<Mmap>,
    remap_count: usize,
}

impl WindowedFileMap {
    /// Opens `path` and maps the window containing `start_offset`.
    ///
    /// A `start_offset` at or past the end of the file maps the last block
    /// instead, nothing is mapped for an empty file.
    /// A `map_limit` of 0 uses the default window size from the computer
    /// parameters. The limit is rounded up to a whole number of blocks.
    pub fn open(
        path: impl AsRef<Path>,
        start_offset: u64,
        map_limit: u64,
        params: &ComputerParameters,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| FileMapError::Io {
            path: path.clone(),
            source,
        })?;
        let file_len = file
            .metadata()
            .map_err(|source| FileMapError::Io {
                path: path.clone(),
                source,
            })?
            .len();

        let block_size = params.block_size.max(1);
        let map_limit = if map_limit == 0 {
            params.default_map_limit()
        } else {
            map_limit
        };
        let map_limit = round_up(map_limit.max(block_size), block_size);

        debug!(
            "Opening windowed map over {} ({} bytes, block {} bytes, window {} bytes)",
            path.display(),
            file_len,
            block_size,
            map_limit
        );

        let mut out = Self {
            path,
            file,
            file_len,
            block_size,
            map_limit,
            window_start: 0,
            mmap: None,
            remap_count: 0,
        };
        if file_len > 0 {
            let start = if start_offset >= file_len {
                debug!(
                    "Start offset {} is past the end of {}, mapping its last block",
                    start_offset,
                    out.path.display()
                );
                file_len - 1
            } else {
                start_offset
            };
            out.remap(start, start + 1)?;
        }
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn map_limit(&self) -> u64 {
        self.map_limit
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    /// Exclusive end of the current window.
    pub fn window_end(&self) -> u64 {
        self.window_start + self.mapped_len()
    }

    pub fn remap_count(&self) -> usize {
        self.remap_count
    }

    fn mapped_len(&self) -> u64 {
        self.mmap.as_ref().map(|m| m.len() as u64).unwrap_or(0)
    }

    fn window_contains(&self, start: u64, end: u64) -> bool {
        self.mmap.is_some() && start >= self.window_start && end <= self.window_end()
    }

    /// Byte at `offset`, the reference is valid until the next window change.
    pub fn at(&mut self, offset: u64) -> Result<&u8> {
        self.ensure_window(offset, offset + 1)?;
        let local = (offset - self.window_start) as usize;
        match &self.mmap {
            Some(mmap) => Ok(&mmap[local]),
            None => Err(self.out_of_bounds(offset)),
        }
    }

    /// Bytes in `[start, end)`, remapping if the range leaves the current window.
    pub fn range(&mut self, start: u64, end: u64) -> Result<&[u8]> {
        if end < start {
            return Err(self.out_of_bounds(start));
        }
        if start == end {
            if start > self.file_len {
                return Err(self.out_of_bounds(start));
            }
            return Ok(&[]);
        }
        self.ensure_window(start, end)?;
        let local_start = (start - self.window_start) as usize;
        let local_end = (end - self.window_start) as usize;
        match &self.mmap {
            Some(mmap) => Ok(&mmap[local_start..local_end]),
            None => Err(self.out_of_bounds(start)),
        }
    }

    /// Moves the window forward by exactly one map limit, for linear scans.
    ///
    /// Returns `false` and leaves the window untouched once the end of the
    /// file is reached.
    pub fn next(&mut self) -> Result<bool> {
        let new_start = self.window_start + self.map_limit;
        if new_start >= self.file_len {
            return Ok(false);
        }
        self.remap(new_start, new_start + 1)?;
        Ok(true)
    }

    fn ensure_window(&mut self, start: u64, end: u64) -> Result<()> {
        if end > self.file_len {
            return Err(self.out_of_bounds(end.saturating_sub(1)));
        }
        if !self.window_contains(start, end) {
            self.remap(start, end)?;
        }
        debug_assert!(self.window_contains(start, end));
        Ok(())
    }

    fn remap(&mut self, start: u64, end: u64) -> Result<()> {
        // Unmap before mapping the replacement window.
        self.mmap = None;

        let window_start = (start / self.block_size) * self.block_size;
        let needed = end - window_start;
        let size = round_up(needed.max(self.map_limit), self.block_size);
        let size = size.min(self.file_len - window_start) as usize;

        trace!(
            "Remapping {} to [{}, {})",
            self.path.display(),
            window_start,
            window_start + size as u64
        );

        // SAFETY: the file is opened read only and database files are never
        // modified while a search holds them open.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(window_start)
                .len(size)
                .map(&self.file)
        }
        .map_err(|source| FileMapError::MapFailure {
            offset: window_start,
            len: size,
            source,
        })?;

        self.mmap = Some(mmap);
        self.window_start = window_start;
        self.remap_count += 1;
        Ok(())
    }

    fn out_of_bounds(&self, offset: u64) -> crate::errors::SeqmatchError {
        FileMapError::OutOfBounds {
            offset,
            len: self.file_len,
        }
        .into()
    }
}

fn round_up(value: u64, block: u64) -> u64 {
    value.div_ceil(block) * block
}
