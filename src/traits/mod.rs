pub mod accession_lookup;
pub mod tolerance;
