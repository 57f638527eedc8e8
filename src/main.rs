use seqmatch::errors::{
    ConfigError,
    SearchError,
};
use seqmatch::models::chemistry::{
    peptide_mass,
    PROTON,
};
use seqmatch::models::peak::RawPeak;
use seqmatch::models::indices::cache_numeric_index;
use seqmatch::{
    AccessionLookup,
    BatchSearch,
    ComputerParameters,
    Hit,
    Result,
    SearchConfig,
    SequenceDatabase,
    Spectrum,
};

use clap::{
    Parser,
    Subcommand,
};
use std::collections::BTreeMap;
use std::path::{
    Path,
    PathBuf,
};
use std::time::Duration;
use tabled::{
    Table,
    Tabled,
};
use tracing::subscriber::set_global_default;
use tracing::{
    error,
    info,
};
use tracing_bunyan_formatter::{
    BunyanFormattingLayer,
    JsonStorageLayer,
};
use tracing_chrome::ChromeLayerBuilder;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::EnvFilter;

const LOCK_TIMEOUT: Duration = Duration::from_secs(600);

fn template_spectra() -> Vec<Spectrum> {
    let peptides: [&[u8]; 3] = [b"PEPTIDEK", b"SAMPLER", b"AMMSR"];
    peptides
        .iter()
        .enumerate()
        .map(|(i, peptide)| {
            let mass = peptide_mass(peptide, true).unwrap_or_default();
            Spectrum {
                id: i as u64 + 1,
                peaks: vec![
                    RawPeak::new(mass + PROTON, 1, 100.0),
                    RawPeak::new((mass + 2.0 * PROTON) / 2.0, 2, 40.0),
                ],
            }
        })
        .collect()
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Parser, Debug)]
struct SearchArgs {
    /// The path to the json file with the search configuration.
    #[arg(short, long)]
    config: PathBuf,

    /// The path to the json file with the spectra.
    #[arg(short, long)]
    spectra: PathBuf,

    /// The directory for partial and final results.
    #[arg(short, long)]
    output_dir: PathBuf,

    // Whether the output json should be pretty printed.
    #[arg(short, long)]
    pretty: bool,

    /// Also write a chrome trace of the search to this file.
    #[arg(long)]
    chrome_trace: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct LookupArgs {
    /// Path prefix of the sequence database.
    #[arg(short, long)]
    database: PathBuf,

    /// The computer parameter file, defaults are used when missing.
    #[arg(short, long)]
    computer: Option<PathBuf>,

    /// Build the numeric accession cache first, when it is stale.
    #[arg(long)]
    cache_numeric: bool,

    accessions: Vec<String>,
}

#[derive(Parser, Debug)]
struct WriteTemplateArgs {
    /// The path to the output files.
    #[arg(short, long)]
    output_path: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search spectra against a sequence database.
    Search(SearchArgs),
    /// Look up database entries by accession.
    Lookup(LookupArgs),
    WriteTemplate(WriteTemplateArgs),
}

#[derive(Tabled)]
struct SpectrumSummary {
    spectrum_id: u64,
    hits: usize,
    modified: usize,
    best_peptide: String,
    best_error: String,
}

#[derive(Tabled)]
struct LookupRow {
    accession: String,
    entry: String,
    unique: bool,
    length: String,
}

fn main() {
    let args = Args::parse();
    let chrome_trace = match &args.command {
        Some(Commands::Search(x)) => x.chrome_trace.clone(),
        _ => None,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatting_layer = BunyanFormattingLayer::new("seqmatch".into(), std::io::stdout);
    let (chrome_layer, _guard) = match chrome_trace {
        Some(path) => {
            let (layer, guard) = ChromeLayerBuilder::new().file(path).build();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
        .with(chrome_layer);

    set_global_default(subscriber).expect("Setting default subscriber failed");

    let out = match args.command {
        Some(Commands::Search(args)) => main_search(args),
        Some(Commands::Lookup(args)) => main_lookup(args),
        Some(Commands::WriteTemplate(args)) => main_write_template(args),
        None => {
            println!("No command provided");
            Ok(())
        }
    };
    if let Err(e) = out {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn write_file(path: &Path, contents: String) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| {
        SearchError::ResultIo {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
        .into()
    })
}

fn main_write_template(args: WriteTemplateArgs) -> Result<()> {
    let put_path = args.output_path;
    let to_json = |value: serde_json::Result<String>, path: &Path| {
        value.map_err(|e| SearchError::ResultIo {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    };
    std::fs::create_dir_all(&put_path).map_err(|source| ConfigError::Io {
        path: put_path.clone(),
        source,
    })?;
    println!("Writing to {}", put_path.display());

    let config_path = put_path.join("search_config.json");
    let spectra_path = put_path.join("spectra.json");
    let config_json = to_json(
        serde_json::to_string_pretty(&SearchConfig::default()),
        &config_path,
    )?;
    let spectra_json = to_json(serde_json::to_string_pretty(&template_spectra()), &spectra_path)?;
    write_file(&config_path, config_json)?;
    write_file(&spectra_path, spectra_json)?;
    println!(
        "use as `seqmatch search --pretty --output-dir '.' --config {:#?} --spectra {:#?}`",
        config_path, spectra_path,
    );
    Ok(())
}

fn read_spectra(path: &Path) -> Result<Vec<Spectrum>> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let spectra = serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(spectra)
}

fn summarize(hits: &[Hit]) -> Vec<SpectrumSummary> {
    let mut by_spectrum: BTreeMap<u64, Vec<&Hit>> = BTreeMap::new();
    for hit in hits {
        by_spectrum.entry(hit.spectrum_id).or_default().push(hit);
    }
    by_spectrum
        .into_iter()
        .map(|(spectrum_id, hits)| {
            let best = hits
                .iter()
                .min_by(|a, b| a.error.abs().total_cmp(&b.error.abs()));
            SpectrumSummary {
                spectrum_id,
                hits: hits.len(),
                modified: hits
                    .iter()
                    .filter(|h| h.modified_sequence != h.peptide)
                    .count(),
                best_peptide: best.map(|h| h.modified_sequence.clone()).unwrap_or_default(),
                best_error: best.map(|h| format!("{:.4}", h.error)).unwrap_or_default(),
            }
        })
        .collect()
}

fn main_search(args: SearchArgs) -> Result<()> {
    let config = SearchConfig::from_path(&args.config)?;
    let spectra = read_spectra(&args.spectra)?;
    info!(
        "Searching {} spectra against {}",
        spectra.len(),
        config.database.display()
    );

    let search = BatchSearch::new(&config)?;
    let hits = search.run(&spectra, &args.output_dir)?;

    let put_path = args.output_dir.join("results.json");
    println!("Writing to {}", put_path.display());
    let serialized = if args.pretty {
        println!("Pretty printing enabled");
        serde_json::to_string_pretty(&hits)
    } else {
        serde_json::to_string(&hits)
    };
    let serialized = serialized.map_err(|e| SearchError::ResultIo {
        path: put_path.clone(),
        message: e.to_string(),
    })?;
    write_file(&put_path, serialized)?;

    println!("{}", Table::new(summarize(&hits)));
    Ok(())
}

fn main_lookup(args: LookupArgs) -> Result<()> {
    let params = match &args.computer {
        Some(path) => ComputerParameters::from_path(path)?,
        None => ComputerParameters::default(),
    };
    if args.cache_numeric && cache_numeric_index(&args.database, &params, LOCK_TIMEOUT)? {
        info!("Numeric accession cache rebuilt");
    }

    let mut database = SequenceDatabase::open(&args.database, &params)?;
    info!(
        "Looking up {} accessions in {}",
        args.accessions.len(),
        database.prefix().display()
    );
    let mut rows = Vec::with_capacity(args.accessions.len());
    for accession in args.accessions {
        let entry = database.lookup_accession(&accession)?;
        let unique = database.accessions().is_unique(&accession)?;
        let length = match entry {
            Some(index) => database.sequence(index)?.len().to_string(),
            None => String::new(),
        };
        rows.push(LookupRow {
            entry: entry.map(|x| x.to_string()).unwrap_or_else(|| "-".into()),
            accession,
            unique,
            length,
        });
    }
    println!("{}", Table::new(rows));
    Ok(())
}
