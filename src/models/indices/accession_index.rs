use super::database_file;
use super::windowed_file_map::WindowedFileMap;
use crate::config::ComputerParameters;
use crate::errors::{
    FileMapError,
    InputError,
    Result,
};
use crate::traits::accession_lookup::AccessionLookup;
use crate::utils::cache_lock::rebuild_if_stale;
use crate::utils::display::{
    glimpse_vec,
    GlimpseConfig,
};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::fmt::Display;
use std::path::Path;
use std::time::Duration;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

const NUMERIC_RECORD_SIZE: usize = 8;
const RECORD_READ_CHUNK: u64 = 128;

/// In memory index for databases whose accessions are plain integers.
///
/// Backed by `<db>.acn`, a flat array of little endian `(i32 number, i32 index)`
/// records.
#[derive(Debug, Clone)]
pub struct NumericAccessionIndex {
    entries: Vec<(i32, u32)>,
}

impl NumericAccessionIndex {
    /// Builds the index from unordered `(number, index)` pairs.
    pub fn from_entries(mut entries: Vec<(i32, u32)>) -> Self {
        entries.par_sort_unstable();
        let out = Self { entries };
        debug_assert!(out.verify(), "NumericAccessionIndex::from_entries failed at verify");
        out
    }

    #[instrument(level = "debug")]
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| FileMapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.len() % NUMERIC_RECORD_SIZE != 0 {
            warn!(
                "Ignoring {} trailing bytes in {}",
                bytes.len() % NUMERIC_RECORD_SIZE,
                path.display()
            );
        }

        let mut entries = Vec::with_capacity(bytes.len() / NUMERIC_RECORD_SIZE);
        for record in bytes.chunks_exact(NUMERIC_RECORD_SIZE) {
            let number = i32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let index = i32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            match u32::try_from(index) {
                Ok(index) => entries.push((number, index)),
                Err(_) => warn!("Skipping accession {} with negative index {}", number, index),
            }
        }
        info!("Loaded {} numeric accessions from {}", entries.len(), path.display());
        Ok(Self::from_entries(entries))
    }

    fn lower_bound(&self, number: i32) -> usize {
        self.entries.partition_point(|(n, _)| *n < number)
    }

    fn parse_accession(accession: &str) -> Result<i32> {
        accession.trim().parse::<i32>().map_err(|_| {
            InputError::InvalidAccession {
                value: accession.to_string(),
            }
            .into()
        })
    }

    fn verify(&self) -> bool {
        self.entries.windows(2).all(|w| w[0] <= w[1])
    }
}

impl AccessionLookup for NumericAccessionIndex {
    fn lookup(&mut self, accession: &str) -> Result<Option<u32>> {
        if accession.trim().is_empty() {
            return Ok(None);
        }
        let number = Self::parse_accession(accession)?;
        let pos = self.lower_bound(number);
        Ok(self
            .entries
            .get(pos)
            .filter(|(n, _)| *n == number)
            .map(|(_, index)| *index))
    }

    fn is_unique(&mut self, accession: &str) -> Result<bool> {
        if accession.trim().is_empty() {
            return Ok(false);
        }
        let number = Self::parse_accession(accession)?;
        let pos = self.lower_bound(number);
        let matches_at = |i: usize| self.entries.get(i).is_some_and(|(n, _)| *n == number);
        Ok(matches_at(pos) && !matches_at(pos + 1))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Index over a sorted text file of free form accessions.
///
/// Only the record offsets live in memory, the accession text itself is
/// read through a [`WindowedFileMap`] on every comparison. Records in
/// `<db>.acc` look like `ACCESSION INDEX\n` and must be sorted
/// case-insensitively by accession.
#[derive(Debug)]
pub struct GeneralAccessionIndex {
    map: WindowedFileMap,
    offsets: Vec<u64>,
}

impl Display for GeneralAccessionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GeneralAccessionIndex {}: \n    len={},\n    offsets={}",
            self.map.path().display(),
            self.offsets.len(),
            glimpse_vec(
                &self.offsets,
                Some(GlimpseConfig {
                    max_items: 10,
                    padding: 2,
                    new_line: false
                })
            ),
        )
    }
}

fn is_record_byte(b: u8) -> bool {
    b.is_ascii_graphic()
}

fn key_of(record: &[u8]) -> &[u8] {
    let end = record
        .iter()
        .position(|b| *b == b' ' || !is_record_byte(*b))
        .unwrap_or(record.len());
    &record[..end]
}

fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    a.iter()
        .map(|x| x.to_ascii_lowercase())
        .cmp(b.iter().map(|x| x.to_ascii_lowercase()))
}

impl GeneralAccessionIndex {
    /// Opens the sorted text file and records where each record starts.
    #[instrument(level = "debug", skip(params))]
    pub fn from_path(path: &Path, params: &ComputerParameters) -> Result<Self> {
        let mut map = WindowedFileMap::open(path, 0, 0, params)?;
        let offsets = Self::scan_offsets(&mut map)?;
        info!(
            "Indexed {} accessions from {}",
            offsets.len(),
            path.display()
        );
        let out = Self { map, offsets };
        debug!("{}", out);
        Ok(out)
    }

    // Linear scan in map sized ranges. The "inside a record" state carries
    // over range boundaries, so records straddling two windows are kept whole.
    fn scan_offsets(map: &mut WindowedFileMap) -> Result<Vec<u64>> {
        let file_len = map.file_len();
        let chunk = map.map_limit();
        let mut offsets = Vec::new();
        let mut record_start: Option<u64> = None;
        let mut pos = 0;

        while pos < file_len {
            let end = (pos + chunk).min(file_len);
            let bytes = map.range(pos, end)?;
            for (i, b) in bytes.iter().enumerate() {
                if *b == b'\n' {
                    if let Some(start) = record_start.take() {
                        offsets.push(start);
                    }
                } else if record_start.is_none() && is_record_byte(*b) {
                    record_start = Some(pos + i as u64);
                }
            }
            pos = end;
        }
        if let Some(start) = record_start {
            offsets.push(start);
        }
        Ok(offsets)
    }

    fn read_record(&mut self, i: usize) -> Result<Vec<u8>> {
        let file_len = self.map.file_len();
        let mut pos = self.offsets[i];
        let mut out = Vec::new();
        while pos < file_len {
            let end = (pos + RECORD_READ_CHUNK).min(file_len);
            let bytes = self.map.range(pos, end)?;
            match bytes.iter().position(|b| *b == b'\n') {
                Some(nl) => {
                    out.extend_from_slice(&bytes[..nl]);
                    return Ok(out);
                }
                None => out.extend_from_slice(bytes),
            }
            pos = end;
        }
        Ok(out)
    }

    fn compare_at(&mut self, i: usize, key: &[u8]) -> Result<Ordering> {
        let record = self.read_record(i)?;
        Ok(compare_keys(key_of(&record), key))
    }

    fn lower_bound(&mut self, key: &[u8]) -> Result<usize> {
        let mut lo = 0;
        let mut hi = self.offsets.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.compare_at(mid, key)? {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        Ok(lo)
    }

    fn matches_at(&mut self, i: usize, key: &[u8]) -> Result<bool> {
        if i >= self.offsets.len() {
            return Ok(false);
        }
        Ok(self.compare_at(i, key)? == Ordering::Equal)
    }

    fn record_index(&mut self, i: usize) -> Result<u32> {
        let record = self.read_record(i)?;
        let text = String::from_utf8_lossy(&record);
        let invalid = || InputError::InvalidAccession {
            value: text.trim_end().to_string(),
        };
        let (_, index) = text.split_once(' ').ok_or_else(invalid)?;
        let index = index
            .trim_matches(|c: char| c.is_whitespace() || c.is_control())
            .parse::<u32>()
            .map_err(|_| invalid())?;
        Ok(index)
    }
}

impl AccessionLookup for GeneralAccessionIndex {
    fn lookup(&mut self, accession: &str) -> Result<Option<u32>> {
        let key = accession.trim().as_bytes();
        if key.is_empty() {
            return Ok(None);
        }
        let pos = self.lower_bound(key)?;
        if self.matches_at(pos, key)? {
            Ok(Some(self.record_index(pos)?))
        } else {
            Ok(None)
        }
    }

    fn is_unique(&mut self, accession: &str) -> Result<bool> {
        let key = accession.trim().as_bytes();
        if key.is_empty() {
            return Ok(false);
        }
        let pos = self.lower_bound(key)?;
        Ok(self.matches_at(pos, key)? && !self.matches_at(pos + 1, key)?)
    }

    fn len(&self) -> usize {
        self.offsets.len()
    }
}

/// Accession index of one sequence database.
///
/// Databases without an index file degrade to [`AccessionIndex::Absent`],
/// for which every lookup returns `None`.
#[derive(Debug)]
pub enum AccessionIndex {
    Numeric(NumericAccessionIndex),
    General(GeneralAccessionIndex),
    Absent,
}

impl AccessionIndex {
    /// Opens `<prefix>.acn` if present, else `<prefix>.acc`.
    pub fn open(prefix: &Path, params: &ComputerParameters) -> Result<Self> {
        let numeric = database_file(prefix, "acn");
        if numeric.exists() {
            return Ok(Self::Numeric(NumericAccessionIndex::from_path(&numeric)?));
        }
        let general = database_file(prefix, "acc");
        if general.exists() {
            return Ok(Self::General(GeneralAccessionIndex::from_path(
                &general, params,
            )?));
        }
        debug!("No accession index for {}", prefix.display());
        Ok(Self::Absent)
    }
}

impl AccessionLookup for AccessionIndex {
    fn lookup(&mut self, accession: &str) -> Result<Option<u32>> {
        match self {
            AccessionIndex::Numeric(x) => x.lookup(accession),
            AccessionIndex::General(x) => x.lookup(accession),
            AccessionIndex::Absent => Ok(None),
        }
    }

    fn is_unique(&mut self, accession: &str) -> Result<bool> {
        match self {
            AccessionIndex::Numeric(x) => x.is_unique(accession),
            AccessionIndex::General(x) => x.is_unique(accession),
            AccessionIndex::Absent => Ok(false),
        }
    }

    fn len(&self) -> usize {
        match self {
            AccessionIndex::Numeric(x) => x.len(),
            AccessionIndex::General(x) => x.len(),
            AccessionIndex::Absent => 0,
        }
    }
}

/// Writes `<prefix>.acn` from `<prefix>.acc` so later opens load the
/// numeric index. Every accession must be an integer.
///
/// Runs under the cache lock of the numeric file and only when it is
/// missing or older than the text index. Returns whether it was written.
pub fn cache_numeric_index(
    prefix: &Path,
    params: &ComputerParameters,
    timeout: Duration,
) -> Result<bool> {
    let general_path = database_file(prefix, "acc");
    if !general_path.exists() {
        return Ok(false);
    }
    let numeric_path = database_file(prefix, "acn");
    rebuild_if_stale(&numeric_path, &[general_path.clone()], timeout, |cache| {
        let mut general = GeneralAccessionIndex::from_path(&general_path, params)?;
        let mut bytes = Vec::with_capacity(general.len() * NUMERIC_RECORD_SIZE);
        for i in 0..general.len() {
            let record = general.read_record(i)?;
            let key = String::from_utf8_lossy(key_of(&record)).into_owned();
            let number = NumericAccessionIndex::parse_accession(&key)?;
            let index = i32::try_from(general.record_index(i)?)
                .map_err(|_| InputError::InvalidAccession { value: key.clone() })?;
            bytes.extend_from_slice(&number.to_le_bytes());
            bytes.extend_from_slice(&index.to_le_bytes());
        }

        let mut partial = cache.as_os_str().to_os_string();
        partial.push(".partial");
        let io_err = |source| FileMapError::Io {
            path: cache.to_path_buf(),
            source,
        };
        std::fs::write(&partial, bytes).map_err(io_err)?;
        std::fs::rename(&partial, cache).map_err(io_err)?;
        info!("Cached {} numeric accessions in {}", general.len(), cache.display());
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SeqmatchError;
    use std::io::Write;
    use tempfile::{
        tempdir,
        NamedTempFile,
    };

    fn small_params() -> ComputerParameters {
        ComputerParameters {
            block_size: 8,
            num_blocks: 2,
        }
    }

    fn write_text(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    fn numeric_bytes(entries: &[(i32, i32)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (number, index) in entries {
            out.extend_from_slice(&number.to_le_bytes());
            out.extend_from_slice(&index.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_numeric_lookup_from_file() {
        let file = write_text(&numeric_bytes(&[(10, 0), (42, 3), (42, 1), (7, 2)]));
        let mut index = NumericAccessionIndex::from_path(file.path()).unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.lookup("7").unwrap(), Some(2));
        assert_eq!(index.lookup(" 42 ").unwrap(), Some(1));
        assert_eq!(index.lookup("11").unwrap(), None);
        assert!(!index.is_unique("42").unwrap());
        assert!(index.is_unique("10").unwrap());
        assert!(!index.is_unique("11").unwrap());
    }

    #[test]
    fn test_numeric_invalid_accession() {
        let mut index = NumericAccessionIndex::from_entries(vec![(1, 1)]);
        match index.lookup("P12345") {
            Err(SeqmatchError::InputError(InputError::InvalidAccession { value })) => {
                assert_eq!(value, "P12345")
            }
            other => panic!("Expected invalid accession, got {:?}", other),
        }
        assert_eq!(index.lookup("").unwrap(), None);
    }

    #[test]
    fn test_numeric_order_independent() {
        let entries = vec![(5, 50), (1, 10), (3, 30), (3, 31), (9, 90), (2, 20)];
        let mut reference = NumericAccessionIndex::from_entries(entries.clone());
        let mut permuted = entries.clone();
        permuted.reverse();
        permuted.swap(0, 3);
        let mut other = NumericAccessionIndex::from_entries(permuted);
        for key in 0..12 {
            let key = key.to_string();
            assert_eq!(
                reference.lookup(&key).unwrap(),
                other.lookup(&key).unwrap()
            );
        }
        assert_eq!(reference.lookup("3").unwrap(), Some(30));
    }

    #[test]
    fn test_general_lookup() {
        let file = write_text(b"A0A001 3\nP12345 7\nQ99999 2\n");
        let mut index = GeneralAccessionIndex::from_path(file.path(), &small_params()).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup("P12345").unwrap(), Some(7));
        assert_eq!(index.lookup("p12345").unwrap(), Some(7));
        assert_eq!(index.lookup("P99999").unwrap(), None);
        assert_eq!(index.lookup("P1234").unwrap(), None);
        assert_eq!(index.lookup("P123456").unwrap(), None);
        assert_eq!(index.lookup("A0A001").unwrap(), Some(3));
        assert_eq!(index.lookup("Q99999").unwrap(), Some(2));
        assert_eq!(index.lookup("ZZZ").unwrap(), None);
    }

    #[test]
    fn test_general_every_key_found_across_windows() {
        let mut text = String::new();
        let mut expected = Vec::new();
        for i in 0..200 {
            let acc = format!("ACC{:05}_LONGER_NAME", i);
            text.push_str(&format!("{} {}\r\n", acc, i * 3));
            expected.push((acc, i * 3));
        }
        text.push_str("\0\0\0\0");
        let file = write_text(text.as_bytes());
        let mut index = GeneralAccessionIndex::from_path(file.path(), &small_params()).unwrap();
        assert_eq!(index.len(), 200);
        for (acc, i) in expected {
            assert_eq!(index.lookup(&acc).unwrap(), Some(i as u32), "{}", acc);
        }
        assert_eq!(index.lookup("ACC99999_LONGER_NAME").unwrap(), None);
    }

    #[test]
    fn test_general_duplicates_first_match() {
        let file = write_text(b"ALPHA 1\nBETA 4\nbeta 5\nGAMMA 6");
        let mut index = GeneralAccessionIndex::from_path(file.path(), &small_params()).unwrap();
        assert_eq!(index.lookup("beta").unwrap(), Some(4));
        assert!(!index.is_unique("BETA").unwrap());
        assert!(index.is_unique("gamma").unwrap());
        assert_eq!(index.lookup("GAMMA").unwrap(), Some(6));
    }

    #[test]
    fn test_general_malformed_record() {
        let file = write_text(b"ALPHA one\n");
        let mut index = GeneralAccessionIndex::from_path(file.path(), &small_params()).unwrap();
        assert!(matches!(
            index.lookup("ALPHA"),
            Err(SeqmatchError::InputError(InputError::InvalidAccession { .. }))
        ));
    }

    #[test]
    fn test_open_degrades_when_absent() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("test.fasta");
        let mut index = AccessionIndex::open(&prefix, &small_params()).unwrap();
        assert!(matches!(index, AccessionIndex::Absent));
        assert_eq!(index.lookup("P12345").unwrap(), None);

        std::fs::write(database_file(&prefix, "acc"), b"P12345 7\nP23456 8\n").unwrap();
        let mut index = AccessionIndex::open(&prefix, &small_params()).unwrap();
        assert!(matches!(index, AccessionIndex::General(_)));
        assert_eq!(index.lookup("P12345").unwrap(), Some(7));
        assert_eq!(index.lookup("P99999").unwrap(), None);
    }

    #[test]
    fn test_cache_numeric_index() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("numeric");
        let timeout = Duration::from_secs(1);
        assert!(!cache_numeric_index(&prefix, &small_params(), timeout).unwrap());

        std::fs::write(database_file(&prefix, "acc"), b"1001 0\n1002 2\n1010 1\n").unwrap();
        assert!(cache_numeric_index(&prefix, &small_params(), timeout).unwrap());
        assert!(!cache_numeric_index(&prefix, &small_params(), timeout).unwrap());

        let mut index = AccessionIndex::open(&prefix, &small_params()).unwrap();
        assert!(matches!(index, AccessionIndex::Numeric(_)));
        assert_eq!(index.lookup("1010").unwrap(), Some(1));
        assert_eq!(index.lookup("1002").unwrap(), Some(2));
    }

    #[test]
    fn test_cache_numeric_index_rejects_text_accessions() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("text");
        std::fs::write(database_file(&prefix, "acc"), b"P12345 0\n").unwrap();
        assert!(matches!(
            cache_numeric_index(&prefix, &small_params(), Duration::from_secs(1)),
            Err(SeqmatchError::InputError(InputError::InvalidAccession { .. }))
        ));
        assert!(!database_file(&prefix, "acn").exists());
    }
}
