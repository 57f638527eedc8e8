pub mod accession_index;
pub mod sequence_database;
pub mod windowed_file_map;

use std::ffi::OsString;
use std::path::{
    Path,
    PathBuf,
};

pub use accession_index::{
    cache_numeric_index,
    AccessionIndex,
    GeneralAccessionIndex,
    NumericAccessionIndex,
};
pub use sequence_database::{
    write_database,
    SequenceDatabase,
};
pub use windowed_file_map::WindowedFileMap;

/// Path of one of the files making up a database, `<prefix>.<ext>`.
///
/// The extension is appended, so a prefix such as `uniprot.fasta` yields
/// `uniprot.fasta.idi` rather than replacing `.fasta`.
pub fn database_file(prefix: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
