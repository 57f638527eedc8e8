use crate::errors::{
    ConfigError,
    Result,
};
use crate::models::digest::DigestParameters;
use crate::models::modification::read_usermods;
use crate::models::modification_table::ModificationParameters;
use crate::models::peak_container::PeakContainerConfig;
use crate::traits::tolerance::ToleranceInfo;
use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing::debug;

/// Machine specific parameters, read once from a `computer.txt` style
/// name/value file and handed to every file map by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerParameters {
    /// Granularity of memory map windows, in bytes.
    pub block_size: u64,
    /// Number of blocks in a default window.
    pub num_blocks: u64,
}

impl Default for ComputerParameters {
    fn default() -> Self {
        ComputerParameters {
            block_size: 64 * 1024,
            num_blocks: 256,
        }
    }
}

impl ComputerParameters {
    pub fn default_map_limit(&self) -> u64 {
        self.block_size * self.num_blocks
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    /// Parses `name value` lines, `#` starts a comment.
    ///
    /// # Example
    /// ```
    /// use seqmatch::config::ComputerParameters;
    ///
    /// let text = "# machine settings\nblock_size 4096\nnum_blocks 16\n";
    /// let params = ComputerParameters::parse(text, "computer.txt").unwrap();
    /// assert_eq!(params.default_map_limit(), 4096 * 16);
    /// ```
    pub fn parse(contents: &str, source: impl AsRef<Path>) -> Result<Self> {
        let mut block_size = None;
        let mut num_blocks = None;

        for line in contents.lines() {
            let line = match line.split_once('#') {
                Some((before, _)) => before,
                None => line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            match key {
                "block_size" => block_size = Some(parse_positive(key, value)?),
                "num_blocks" => num_blocks = Some(parse_positive(key, value)?),
                _ => debug!("Ignoring computer parameter {}", key),
            }
        }

        let missing = |key: &str| ConfigError::MissingKey {
            key: key.to_string(),
            path: source.as_ref().to_path_buf(),
        };
        Ok(Self {
            block_size: block_size.ok_or_else(|| missing("block_size"))?,
            num_blocks: num_blocks.ok_or_else(|| missing("num_blocks"))?,
        })
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(x) if x > 0 => Ok(x),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
        .into()),
    }
}

/// Everything a batch search needs, read from a json file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Path prefix of the sequence database (`<prefix>.idi`, `<prefix>.idc`, ...).
    pub database: PathBuf,
    /// Optional `computer.txt` file, defaults are used when missing.
    pub computer_parameters: Option<PathBuf>,
    pub parent_tolerance: ToleranceInfo,
    pub peaks: PeakContainerConfig,
    pub modifications: ModificationParameters,
    /// Usermod file whose records are added to the user modifications.
    #[serde(default)]
    pub user_modifications: Option<PathBuf>,
    pub digest: DigestParameters,
    pub max_peptide_hits: usize,
    pub num_workers: usize,
    pub batch_size: usize,
}

impl SearchConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Reads the computer parameters if configured, otherwise uses the defaults.
    pub fn load_computer_parameters(&self) -> Result<ComputerParameters> {
        match &self.computer_parameters {
            Some(path) => ComputerParameters::from_path(path),
            None => Ok(ComputerParameters::default()),
        }
    }

    /// The configured modifications plus those of the usermod file, if any.
    pub fn modification_parameters(&self) -> Result<ModificationParameters> {
        let mut out = self.modifications.clone();
        if let Some(path) = &self.user_modifications {
            out.user.extend(read_usermods(path)?);
        }
        Ok(out)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            database: PathBuf::from("database"),
            computer_parameters: None,
            parent_tolerance: ToleranceInfo::default(),
            peaks: PeakContainerConfig::default(),
            modifications: ModificationParameters::default(),
            user_modifications: None,
            digest: DigestParameters::default(),
            max_peptide_hits: 10_000,
            num_workers: 4,
            batch_size: 256,
        }
    }
}
