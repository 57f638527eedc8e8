use super::accession_index::AccessionIndex;
use super::database_file;
use super::windowed_file_map::WindowedFileMap;
use crate::config::ComputerParameters;
use crate::errors::{
    FileMapError,
    InputError,
    Result,
};
use crate::traits::accession_lookup::AccessionLookup;
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    info,
    instrument,
};

const COUNT_HEADER_SIZE: u64 = 4;
const OFFSET_SIZE: u64 = 8;

/// Read only view over an indexed flat sequence database.
///
/// `<db>.idi` holds a `u32` entry count followed by `count + 1` `u64`
/// offsets into `<db>.idc`, which holds the concatenated one letter
/// sequences. Every instance owns its own file maps, so independent
/// workers can open the same database without coordination.
#[derive(Debug)]
pub struct SequenceDatabase {
    prefix: PathBuf,
    num_entries: u32,
    offsets: WindowedFileMap,
    sequences: WindowedFileMap,
    accessions: AccessionIndex,
}

impl SequenceDatabase {
    #[instrument(level = "debug", skip(params))]
    pub fn open(prefix: &Path, params: &ComputerParameters) -> Result<Self> {
        let index_path = database_file(prefix, "idi");
        let mut offsets = WindowedFileMap::open(&index_path, 0, 0, params)?;
        let num_entries = read_entry_count(&mut offsets)?;

        let expected = COUNT_HEADER_SIZE + (num_entries as u64 + 1) * OFFSET_SIZE;
        if offsets.file_len() < expected {
            return Err(FileMapError::Truncated {
                path: index_path,
                expected,
                found: offsets.file_len(),
            }
            .into());
        }

        let sequences = WindowedFileMap::open(database_file(prefix, "idc"), 0, 0, params)?;
        let accessions = AccessionIndex::open(prefix, params)?;
        info!(
            "Opened database {} with {} entries",
            prefix.display(),
            num_entries
        );
        Ok(Self {
            prefix: prefix.to_path_buf(),
            num_entries,
            offsets,
            sequences,
            accessions,
        })
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn num_entries(&self) -> u32 {
        self.num_entries
    }

    fn entry_offset(&mut self, i: u32) -> Result<u64> {
        let start = COUNT_HEADER_SIZE + i as u64 * OFFSET_SIZE;
        let bytes = self.offsets.range(start, start + OFFSET_SIZE)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Sequence of entry `index`.
    pub fn sequence(&mut self, index: u32) -> Result<Vec<u8>> {
        if index >= self.num_entries {
            return Err(InputError::EntryOutOfRange {
                index,
                num_entries: self.num_entries,
            }
            .into());
        }
        let start = self.entry_offset(index)?;
        let end = self.entry_offset(index + 1)?;
        if end < start {
            return Err(FileMapError::OutOfBounds {
                offset: start,
                len: self.sequences.file_len(),
            }
            .into());
        }
        Ok(self.sequences.range(start, end)?.to_vec())
    }

    pub fn lookup_accession(&mut self, accession: &str) -> Result<Option<u32>> {
        self.accessions.lookup(accession)
    }

    pub fn accessions(&mut self) -> &mut AccessionIndex {
        &mut self.accessions
    }
}

fn read_entry_count(map: &mut WindowedFileMap) -> Result<u32> {
    if map.file_len() < COUNT_HEADER_SIZE {
        return Err(FileMapError::Truncated {
            path: map.path().to_path_buf(),
            expected: COUNT_HEADER_SIZE,
            found: map.file_len(),
        }
        .into());
    }
    let bytes = map.range(0, COUNT_HEADER_SIZE)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Writes a database in the on-disk layout read by [`SequenceDatabase`].
///
/// Building real databases is the job of external indexing tools, this
/// is meant for fixtures and small ad hoc databases.
pub fn write_database(prefix: &Path, entries: &[(&str, &str)]) -> Result<()> {
    let mut idi = Vec::with_capacity(4 + (entries.len() + 1) * 8);
    let mut idc = Vec::new();
    let mut acc = Vec::with_capacity(entries.len());

    idi.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (i, (accession, sequence)) in entries.iter().enumerate() {
        idi.extend_from_slice(&(idc.len() as u64).to_le_bytes());
        idc.extend_from_slice(sequence.as_bytes());
        acc.push((accession.to_string(), i));
    }
    idi.extend_from_slice(&(idc.len() as u64).to_le_bytes());
    acc.sort_by(|a, b| {
        a.0.to_ascii_lowercase()
            .cmp(&b.0.to_ascii_lowercase())
            .then(a.1.cmp(&b.1))
    });
    let acc: String = acc
        .into_iter()
        .map(|(accession, i)| format!("{} {}\n", accession, i))
        .collect();

    for (ext, contents) in [("idi", idi), ("idc", idc), ("acc", acc.into_bytes())] {
        let path = database_file(prefix, ext);
        std::fs::write(&path, contents).map_err(|source| FileMapError::Io {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}
