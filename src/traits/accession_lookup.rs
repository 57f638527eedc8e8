use crate::errors::Result;

/// Translates an external accession string into the internal entry index
/// of a sequence database.
///
/// Lookups may need to touch a memory map, which is why they take `&mut self`.
pub trait AccessionLookup {
    /// Entry index of the first record matching `accession`, `None` if absent.
    fn lookup(&mut self, accession: &str) -> Result<Option<u32>>;

    /// Whether exactly one record matches `accession`.
    fn is_unique(&mut self, accession: &str) -> Result<bool>;

    /// Number of records in the index.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
