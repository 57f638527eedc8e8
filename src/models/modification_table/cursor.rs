use super::{
    CategoryLimits,
    ModificationCategory,
    ModificationId,
    TableEntry,
};
use crate::models::modification::ModificationKind;
use tracing::warn;

/// Upper bound on the number of precomputed multi modification entries.
pub const MAX_MULTI_MOD_ENTRIES: usize = 100_000;

/// A mass shift reachable by a set of modifications, ignoring where on
/// the peptide they would sit.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry {
    pub shift: f64,
    /// (modification, occurrences)
    pub composition: Vec<(ModificationId, usize)>,
}

/// Single and multi modification shifts, sorted ascending.
#[derive(Debug, Clone, Default)]
pub struct CursorLists {
    singles: Vec<CursorEntry>,
    multis: Vec<CursorEntry>,
    multi_truncated: bool,
}

struct MultiBuilder<'a> {
    entries: &'a [TableEntry],
    limits: &'a CategoryLimits,
    max_levels: usize,
    current: Vec<ModificationId>,
    out: Vec<CursorEntry>,
    truncated: bool,
}

impl MultiBuilder<'_> {
    fn allowed(&self, id: ModificationId) -> bool {
        let entry = &self.entries[id];
        let count = self.current.iter().filter(|x| **x == id).count();
        if count >= entry.cap {
            return false;
        }
        let in_category = self
            .current
            .iter()
            .filter(|x| self.entries[**x].category == entry.category)
            .count();
        if in_category >= self.limits.limit(entry.category) {
            return false;
        }
        let has_kind = |kind: ModificationKind| {
            self.current
                .iter()
                .any(|x| self.entries[*x].modification.kind == kind)
        };
        match entry.modification.kind {
            ModificationKind::Standard => true,
            ModificationKind::Dehydro => !has_kind(ModificationKind::Cation),
            ModificationKind::Cation => !has_kind(ModificationKind::Dehydro),
        }
    }

    fn push_current(&mut self) {
        let mut composition: Vec<(ModificationId, usize)> = Vec::new();
        for id in self.current.iter() {
            match composition.last_mut() {
                Some((last, count)) if last == id => *count += 1,
                _ => composition.push((*id, 1)),
            }
        }
        let shift = self.current.iter().map(|x| self.entries[*x].shift).sum();
        self.out.push(CursorEntry { shift, composition });
    }

    // Multisets with non decreasing ids, so each composition shows up once.
    fn extend(&mut self, from: ModificationId) {
        if self.current.len() >= 2 {
            if self.out.len() >= MAX_MULTI_MOD_ENTRIES {
                self.truncated = true;
                return;
            }
            self.push_current();
        }
        if self.current.len() == self.max_levels {
            return;
        }
        for id in from..self.entries.len() {
            if self.truncated {
                return;
            }
            if self.allowed(id) {
                self.current.push(id);
                self.extend(id);
                self.current.pop();
            }
        }
    }
}

impl CursorLists {
    pub fn build(entries: &[TableEntry], limits: &CategoryLimits, max_levels: usize) -> Self {
        let mut singles: Vec<CursorEntry> = entries
            .iter()
            .enumerate()
            .map(|(id, e)| CursorEntry {
                shift: e.shift,
                composition: vec![(id, 1)],
            })
            .collect();
        singles.sort_by(|a, b| a.shift.total_cmp(&b.shift));

        let mut builder = MultiBuilder {
            entries,
            limits,
            max_levels,
            current: Vec::new(),
            out: Vec::new(),
            truncated: false,
        };
        if max_levels >= 2 {
            builder.extend(0);
        }
        if builder.truncated {
            warn!(
                "More than {} multi modification combinations, the cursor will not rule out any window",
                MAX_MULTI_MOD_ENTRIES
            );
        }
        let mut multis = builder.out;
        multis.sort_by(|a, b| a.shift.total_cmp(&b.shift));

        Self {
            singles,
            multis,
            multi_truncated: builder.truncated,
        }
    }

    pub fn singles(&self) -> &[CursorEntry] {
        &self.singles
    }

    pub fn multis(&self) -> &[CursorEntry] {
        &self.multis
    }

    pub fn multi_truncated(&self) -> bool {
        self.multi_truncated
    }

    /// Number of modifications of `category` in an entry.
    pub fn category_count(
        entry: &CursorEntry,
        entries: &[TableEntry],
        category: ModificationCategory,
    ) -> usize {
        entry
            .composition
            .iter()
            .filter(|(id, _)| entries[*id].category == category)
            .map(|(_, count)| count)
            .sum()
    }
}

// First position at or after `pos` whose shift is not below `start`.
// Steps forward for small moves, bisects when moving back.
fn seek(list: &[CursorEntry], mut pos: usize, start: f64) -> usize {
    if pos > list.len() || (pos > 0 && list[pos - 1].shift >= start) {
        return list.partition_point(|e| e.shift < start);
    }
    while pos < list.len() && list[pos].shift < start {
        pos += 1;
    }
    pos
}

/// Position in the sorted shift lists, advanced as the searched windows
/// move up in mass.
#[derive(Debug, Clone)]
pub struct ModificationCursor<'a> {
    lists: &'a CursorLists,
    next_single: usize,
    next_multi: usize,
}

impl<'a> ModificationCursor<'a> {
    pub fn new(lists: &'a CursorLists) -> Self {
        Self {
            lists,
            next_single: 0,
            next_multi: 0,
        }
    }

    pub fn reset(&mut self) {
        self.next_single = 0;
        self.next_multi = 0;
    }

    pub fn advance_to(&mut self, start: f64) {
        self.next_single = seek(&self.lists.singles, self.next_single, start);
        self.next_multi = seek(&self.lists.multis, self.next_multi, start);
    }

    /// Whether any known shift could fall in `[start, end]`, with the cursor
    /// already advanced to `start`.
    pub fn check_match(&self, end: f64) -> bool {
        let hit = |list: &[CursorEntry], pos: usize| list.get(pos).is_some_and(|e| e.shift <= end);
        hit(&self.lists.singles, self.next_single)
            || hit(&self.lists.multis, self.next_multi)
            || self.lists.multi_truncated
    }

    /// Single modifications with a shift inside `[start, end]`.
    pub fn possible_modifications(&mut self, start: f64, end: f64) -> &'a [CursorEntry] {
        self.advance_to(start);
        let rest = &self.lists.singles[self.next_single..];
        &rest[..rest.partition_point(|e| e.shift <= end)]
    }

    /// Multi modification compositions with a shift inside `[start, end]`.
    pub fn possible_multi_modifications(&mut self, start: f64, end: f64) -> &'a [CursorEntry] {
        self.advance_to(start);
        let rest = &self.lists.multis[self.next_multi..];
        &rest[..rest.partition_point(|e| e.shift <= end)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::modification::{
        Modification,
        Specificity,
    };
    use crate::models::modification_table::{
        ModificationParameters,
        ModificationTable,
    };

    fn table(variable: Vec<Modification>, max_levels: usize) -> ModificationTable {
        let params = ModificationParameters {
            constant: Vec::new(),
            variable,
            max_levels,
            max_mods: max_levels,
            category_limits: CategoryLimits {
                variable: max_levels,
                user: 1,
                rare: 1,
            },
            ..Default::default()
        };
        ModificationTable::new(&params, true)
    }

    fn simple_mods() -> Vec<Modification> {
        vec![
            Modification::new("Oxidation", Some('M'), Specificity::Anywhere, 15.995, 15.999),
            Modification::new("Deamidated", Some('N'), Specificity::Anywhere, 0.984, 0.985),
            Modification::new("Loss", Some('S'), Specificity::NeutralLoss, -18.011, -18.015),
        ]
    }

    #[test]
    fn test_lists_are_sorted() {
        let table = table(simple_mods(), 2);
        let lists = table.cursor_lists();
        let singles: Vec<f64> = lists.singles().iter().map(|e| e.shift).collect();
        assert_eq!(singles, vec![-18.011, 0.984, 15.995]);
        // 3 pairs of distinct modifications and 3 doubles.
        assert_eq!(lists.multis().len(), 6);
        assert!(lists.multis().windows(2).all(|w| w[0].shift <= w[1].shift));
        assert!(!lists.multi_truncated());
    }

    #[test]
    fn test_cursor_forward_and_back() {
        let table = table(simple_mods(), 2);
        let mut cursor = table.cursor();

        let found = cursor.possible_modifications(15.9, 16.1);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].composition, vec![(0, 1)]);

        cursor.advance_to(31.9);
        assert!(cursor.check_match(32.1));
        let doubles = cursor.possible_multi_modifications(31.9, 32.1);
        assert_eq!(doubles.len(), 1);
        assert_eq!(doubles[0].composition, vec![(0, 2)]);

        // Moving back re-finds earlier entries.
        let found = cursor.possible_modifications(-18.1, -17.9);
        assert_eq!(found.len(), 1);
        cursor.advance_to(5.0);
        assert!(!cursor.check_match(10.0));

        cursor.reset();
        assert!(cursor.check_match(-18.0));
    }

    #[test]
    fn test_dehydro_and_cation_never_combined() {
        let mods = vec![
            Modification::new("Dehydrated", Some('S'), Specificity::Anywhere, -18.011, -18.015)
                .with_kind(ModificationKind::Dehydro),
            Modification::new("Sodium", None, Specificity::Anywhere, 21.982, 21.982)
                .with_kind(ModificationKind::Cation),
        ];
        let table = table(mods, 2);
        let lists = table.cursor_lists();
        assert_eq!(lists.multis().len(), 2);
        assert!(lists.multis().iter().all(|e| e.composition.len() == 1));
    }

    #[test]
    fn test_truncation_keeps_cursor_conservative() {
        let mods: Vec<Modification> = (0..100)
            .map(|i| {
                Modification::new(format!("M{}", i), None, Specificity::Anywhere, i as f64, i as f64)
            })
            .collect();
        let table = table(mods, 3);
        let lists = table.cursor_lists();
        assert!(lists.multi_truncated());
        assert_eq!(lists.multis().len(), MAX_MULTI_MOD_ENTRIES);

        let mut cursor = table.cursor();
        cursor.advance_to(10_000.0);
        assert!(cursor.check_match(10_001.0));
    }

    #[test]
    fn test_category_count() {
        let table = table(simple_mods(), 2);
        let lists = table.cursor_lists();
        for entry in lists.multis() {
            assert_eq!(
                CursorLists::category_count(entry, table.entries(), ModificationCategory::Variable),
                2
            );
        }
    }
}
