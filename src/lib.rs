// Re-export main structures
pub use crate::config::{
    ComputerParameters,
    SearchConfig,
};
pub use crate::errors::{
    Result,
    SeqmatchError,
};
pub use crate::models::indices::{
    AccessionIndex,
    SequenceDatabase,
    WindowedFileMap,
};
pub use crate::models::modification_table::{
    ModificationParameters,
    ModificationTable,
};
pub use crate::models::peak_container::{
    PeakContainer,
    PeakContainerConfig,
};
pub use crate::search::{
    BatchSearch,
    Hit,
    PeptideSearch,
    Spectrum,
};

// Re-export traits
pub use crate::traits::accession_lookup::AccessionLookup;
pub use crate::traits::tolerance::{
    MassTolerance,
    Tolerance,
    ToleranceInfo,
};

// Declare modules
pub mod config;
pub mod errors;
pub mod models;
pub mod search;
pub mod traits;
pub mod utils;
