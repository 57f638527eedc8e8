pub mod batch;
pub mod driver;
pub mod messages;

pub use batch::BatchSearch;
pub use driver::{
    Hit,
    PeptideSearch,
    Spectrum,
};
pub use messages::WorkerMessage;
