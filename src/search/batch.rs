use super::driver::{
    Hit,
    PeptideSearch,
    Spectrum,
};
use super::messages::WorkerMessage;
use crate::config::{
    ComputerParameters,
    SearchConfig,
};
use crate::errors::{
    Result,
    SearchError,
};
use crate::models::indices::SequenceDatabase;
use crate::models::modification_table::{
    ModificationParameters,
    ModificationTable,
};
use crate::models::peak_container::PeakContainer;
use indicatif::ProgressBar;
use std::fs::File;
use std::io::{
    BufReader,
    BufWriter,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::mpsc::{
    self,
    Receiver,
    Sender,
    TryRecvError,
};
use std::time::{
    Duration,
    Instant,
};
use tracing::{
    debug,
    error,
    info,
    instrument,
    warn,
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs a search over many spectra, batch after batch, with the spectra
/// of each batch split between worker threads.
///
/// Workers own everything they touch (database maps, modification table,
/// peak containers) and hand their hits back through partial result files.
#[derive(Debug)]
pub struct BatchSearch<'a> {
    config: &'a SearchConfig,
    computer: ComputerParameters,
    modifications: ModificationParameters,
}

pub fn partial_result_path(out_dir: &Path, batch: usize, worker: usize) -> PathBuf {
    out_dir.join(format!("batch_{}_worker_{}.msgpack", batch, worker))
}

fn result_io(path: &Path, message: impl ToString) -> SearchError {
    SearchError::ResultIo {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn write_partial(path: &Path, hits: &[Hit]) -> Result<()> {
    let file = File::create(path).map_err(|e| result_io(path, e))?;
    let mut writer = BufWriter::new(file);
    rmp_serde::encode::write(&mut writer, hits).map_err(|e| result_io(path, e))?;
    writer.flush().map_err(|e| result_io(path, e))?;
    Ok(())
}

fn read_partial(path: &Path) -> Result<Vec<Hit>> {
    let file = File::open(path).map_err(|e| result_io(path, e))?;
    let hits = rmp_serde::from_read(BufReader::new(file)).map_err(|e| result_io(path, e))?;
    Ok(hits)
}

fn remove_partials(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed partial result {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Unable to remove {}: {}", path.display(), e),
        }
    }
}

fn run_worker(
    config: &SearchConfig,
    computer: &ComputerParameters,
    modifications: &ModificationParameters,
    spectra: &[Spectrum],
    path: &Path,
    sender: &Sender<WorkerMessage>,
    abort: &AtomicBool,
) -> Result<()> {
    let mut database = SequenceDatabase::open(&config.database, computer)?;
    // A closed channel means the master is gone, there is nobody to tell.
    let _ = sender.send(WorkerMessage::DatabaseCount(database.num_entries() as u64));
    let table = ModificationTable::new(modifications, config.peaks.monoisotopic);
    let search = PeptideSearch::new(
        &config.parent_tolerance,
        &table,
        &config.digest,
        config.max_peptide_hits,
    );

    let mut hits = Vec::new();
    for spectrum in spectra {
        if abort.load(Ordering::Relaxed) {
            return Ok(());
        }
        let container = PeakContainer::new(&spectrum.peaks, &config.peaks, &config.parent_tolerance);
        if container.is_empty() {
            debug!("Spectrum {} has no peaks left after filtering", spectrum.id);
        }
        hits.extend(search.search_database(spectrum.id, &container, &mut database, abort)?);
        let _ = sender.send(WorkerMessage::Progress);
    }
    write_partial(path, &hits)
}

impl<'a> BatchSearch<'a> {
    pub fn new(config: &'a SearchConfig) -> Result<Self> {
        let computer = config.load_computer_parameters()?;
        let modifications = config.modification_parameters()?;
        Ok(Self {
            config,
            computer,
            modifications,
        })
    }

    fn num_workers(&self) -> usize {
        if self.config.num_workers == 0 {
            warn!("num_workers of 0 is not valid, using 1");
            1
        } else {
            self.config.num_workers
        }
    }

    fn batch_size(&self) -> usize {
        if self.config.batch_size == 0 {
            warn!("batch_size of 0 is not valid, using 1");
            1
        } else {
            self.config.batch_size
        }
    }

    /// Searches every spectrum and returns the hits ordered by spectrum id,
    /// then database entry.
    ///
    /// Partial results are written to `out_dir` and removed once merged.
    /// The first failing worker stops the whole search.
    #[instrument(level = "info", skip_all, fields(num_spectra = spectra.len()))]
    pub fn run(&self, spectra: &[Spectrum], out_dir: &Path) -> Result<Vec<Hit>> {
        std::fs::create_dir_all(out_dir).map_err(|e| result_io(out_dir, e))?;
        let start = Instant::now();
        let progress = ProgressBar::new(spectra.len() as u64);

        let mut out = Vec::new();
        for (batch_index, batch) in spectra.chunks(self.batch_size()).enumerate() {
            let hits = self.run_batch(batch_index, batch, out_dir, &progress);
            match hits {
                Ok(hits) => out.extend(hits),
                Err(e) => {
                    progress.abandon();
                    return Err(e);
                }
            }
        }
        progress.finish();

        out.sort_by(|a, b| {
            a.spectrum_id
                .cmp(&b.spectrum_id)
                .then(a.entry_index.cmp(&b.entry_index))
        });
        info!(
            "Searched {} spectra in {:.2?}, {} hits",
            spectra.len(),
            start.elapsed(),
            out.len()
        );
        Ok(out)
    }

    fn run_batch(
        &self,
        batch_index: usize,
        batch: &[Spectrum],
        out_dir: &Path,
        progress: &ProgressBar,
    ) -> Result<Vec<Hit>> {
        let chunk_size = batch.len().div_ceil(self.num_workers()).max(1);
        let chunks: Vec<&[Spectrum]> = batch.chunks(chunk_size).collect();
        let paths: Vec<PathBuf> = (0..chunks.len())
            .map(|w| partial_result_path(out_dir, batch_index, w))
            .collect();
        debug!(
            "Batch {} with {} spectra on {} workers",
            batch_index,
            batch.len(),
            chunks.len()
        );

        let abort = AtomicBool::new(false);
        let failure = std::thread::scope(|scope| {
            let mut receivers: Vec<Receiver<WorkerMessage>> = Vec::with_capacity(chunks.len());
            for (chunk, path) in chunks.iter().zip(paths.iter()) {
                let (sender, receiver) = mpsc::channel();
                receivers.push(receiver);
                let abort = &abort;
                let config = self.config;
                let computer = &self.computer;
                let modifications = &self.modifications;
                scope.spawn(move || {
                    let out = run_worker(config, computer, modifications, chunk, path, &sender, abort);
                    let message = match out {
                        Ok(()) => WorkerMessage::Done,
                        Err(e) => WorkerMessage::Error(e.to_string()),
                    };
                    let _ = sender.send(message);
                });
            }
            poll_workers(&receivers, &abort, progress)
        });

        if let Some((worker, message)) = failure {
            error!("Worker {} of batch {} failed: {}", worker, batch_index, message);
            remove_partials(&paths);
            return Err(SearchError::WorkerFailed { worker, message }.into());
        }

        let mut hits = Vec::new();
        for path in &paths {
            hits.extend(read_partial(path)?);
        }
        remove_partials(&paths);
        Ok(hits)
    }
}

// Waits until every worker reported `Done` or `Error`. Returns the
// first failure, after which the other workers are told to stop.
fn poll_workers(
    receivers: &[Receiver<WorkerMessage>],
    abort: &AtomicBool,
    progress: &ProgressBar,
) -> Option<(usize, String)> {
    let mut finished = vec![false; receivers.len()];
    let mut failure: Option<(usize, String)> = None;
    let fail = |worker: usize, message: String, failure: &mut Option<(usize, String)>| {
        abort.store(true, Ordering::Relaxed);
        if failure.is_none() {
            *failure = Some((worker, message));
        }
    };

    while finished.iter().any(|x| !x) {
        let mut idle = true;
        for (worker, receiver) in receivers.iter().enumerate() {
            if finished[worker] {
                continue;
            }
            match receiver.try_recv() {
                Ok(message) => {
                    idle = false;
                    match message {
                        WorkerMessage::DatabaseCount(n) => {
                            debug!("Worker {} opened a database of {} entries", worker, n)
                        }
                        WorkerMessage::Progress => progress.inc(1),
                        WorkerMessage::Done => finished[worker] = true,
                        WorkerMessage::Error(message) => {
                            finished[worker] = true;
                            fail(worker, message, &mut failure);
                        }
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    finished[worker] = true;
                    fail(worker, "worker exited without reporting".into(), &mut failure);
                }
            }
        }
        if idle {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SeqmatchError;
    use crate::models::chemistry::{
        peptide_mass,
        PROTON,
    };
    use crate::models::indices::write_database;
    use crate::models::modification::{
        Modification,
        Specificity,
    };
    use crate::models::modification_table::ModificationParameters;
    use crate::models::peak::RawPeak;
    use crate::models::peak_container::PeakContainerConfig;
    use crate::models::digest::DigestParameters;
    use crate::traits::tolerance::{
        MassTolerance,
        ToleranceInfo,
    };
    use tempfile::tempdir;

    const PROTEINS: [(&str, &str); 4] = [
        ("P1", "PEPTIDEKAMMSR"),
        ("P2", "GGGGGKLLLLLR"),
        ("P3", "PEPTIDEKSAMPLER"),
        ("P4", "WWWWWK"),
    ];

    fn config(database: PathBuf) -> SearchConfig {
        SearchConfig {
            database,
            parent_tolerance: ToleranceInfo::new(MassTolerance::Da(0.02)),
            peaks: PeakContainerConfig {
                min_peaks: 0,
                max_peaks: None,
                ..Default::default()
            },
            modifications: ModificationParameters {
                constant: Vec::new(),
                variable: vec![Modification::new(
                    "Oxidation",
                    Some('M'),
                    Specificity::Anywhere,
                    15.994_915,
                    15.9994,
                )],
                ..Default::default()
            },
            digest: DigestParameters {
                missed_cleavages: 0,
                min_len: 4,
                ..Default::default()
            },
            max_peptide_hits: 100,
            num_workers: 3,
            batch_size: 4,
            ..Default::default()
        }
    }

    fn spectrum(id: u64, peptides: &[&[u8]]) -> Spectrum {
        Spectrum {
            id,
            peaks: peptides
                .iter()
                .map(|p| RawPeak::new(peptide_mass(p, true).unwrap() + PROTON, 1, 10.0))
                .collect(),
        }
    }

    fn msgpack_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|x| x == "msgpack")
            })
            .count()
    }

    #[test]
    fn test_run_aggregates_in_order() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        write_database(&prefix, &PROTEINS).unwrap();
        let config = config(prefix);
        let search = BatchSearch::new(&config).unwrap();

        let spectra: Vec<Spectrum> = (0..7)
            .rev()
            .map(|id| {
                if id % 2 == 0 {
                    spectrum(id, &[b"PEPTIDEK"])
                } else {
                    spectrum(id, &[b"WWWWWK"])
                }
            })
            .collect();

        let out_dir = dir.path().join("out");
        let hits = search.run(&spectra, &out_dir).unwrap();

        // Even spectra hit P1 and P3, odd spectra hit P4.
        assert_eq!(hits.len(), 4 * 2 + 3);
        assert!(hits.windows(2).all(|w| {
            (w[0].spectrum_id, w[0].entry_index) <= (w[1].spectrum_id, w[1].entry_index)
        }));
        let first: Vec<u32> = hits
            .iter()
            .filter(|h| h.spectrum_id == 0)
            .map(|h| h.entry_index)
            .collect();
        assert_eq!(first, vec![0, 2]);
        assert_eq!(msgpack_files(&out_dir), 0);
    }

    #[test]
    fn test_matches_single_threaded_search() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        write_database(&prefix, &PROTEINS).unwrap();
        let mut config = config(prefix);
        let spectra = vec![
            spectrum(1, &[b"LLLLLR", b"SAMPLER"]),
            spectrum(2, &[b"AMMSR"]),
        ];

        config.num_workers = 1;
        let single = BatchSearch::new(&config)
            .unwrap()
            .run(&spectra, &dir.path().join("single"))
            .unwrap();
        config.num_workers = 4;
        config.batch_size = 1;
        let parallel = BatchSearch::new(&config)
            .unwrap()
            .run(&spectra, &dir.path().join("parallel"))
            .unwrap();
        assert!(!single.is_empty());
        assert_eq!(single, parallel);
    }

    #[test]
    fn test_worker_failure_aborts_and_cleans_up() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        write_database(&prefix, &PROTEINS).unwrap();
        let mut config = config(prefix);
        config.max_peptide_hits = 1;

        // The oxidized forms of AMMSR exceed the hit limit in one worker.
        let spectra = vec![
            spectrum(1, &[b"WWWWWK"]),
            spectrum(2, &[b"WWWWWK"]),
            spectrum(3, &[b"AMMSR"]),
        ];
        let mut modified = spectra[2].clone();
        modified.peaks[0].m_over_z += 15.994_915;
        let spectra = vec![spectra[0].clone(), spectra[1].clone(), modified];

        let out_dir = dir.path().join("out");
        let out = BatchSearch::new(&config).unwrap().run(&spectra, &out_dir);
        match out {
            Err(SeqmatchError::SearchError(SearchError::WorkerFailed { worker, message })) => {
                assert_eq!(worker, 2);
                assert!(message.contains("peptide hits"), "{}", message);
            }
            other => panic!("Expected a worker failure, got {:?}", other),
        }
        assert_eq!(msgpack_files(&out_dir), 0);
    }

    #[test]
    fn test_missing_database_fails() {
        let dir = tempdir().unwrap();
        let config = config(dir.path().join("missing"));
        let out = BatchSearch::new(&config)
            .unwrap()
            .run(&[spectrum(1, &[b"PEPTIDEK"])], &dir.path().join("out"));
        assert!(matches!(
            out,
            Err(SeqmatchError::SearchError(SearchError::WorkerFailed { worker: 0, .. }))
        ));
    }

    #[test]
    fn test_partial_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = partial_result_path(dir.path(), 3, 1);
        assert!(path.ends_with("batch_3_worker_1.msgpack"));
        let hits = vec![Hit {
            spectrum_id: 4,
            entry_index: 2,
            start: 0,
            peptide: "PEPTIDEK".into(),
            modified_sequence: "PEPTIDEK".into(),
            peak_index: 0,
            peak_mass: 927.45,
            theoretical_mass: 927.44,
            error: 0.01,
            truncated: false,
        }];
        write_partial(&path, &hits).unwrap();
        assert_eq!(read_partial(&path).unwrap(), hits);
    }
}
