use super::{
    ModificationId,
    ModificationTable,
    Site,
};
use crate::models::modification::ModificationKind;
use crate::utils::tolerance_ranges::MassRange;
use nohash_hasher::IntMap;

// Float sums are accumulated in a different order while pruning.
const PRUNE_SLACK: f64 = 1e-9;

/// The modifications that may be placed on one site of a peptide.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteOptions {
    pub site: Site,
    pub options: Vec<ModificationId>,
}

/// One placement of modifications on a peptide.
#[derive(Debug, Clone, PartialEq)]
pub struct ModificationCombination {
    pub counts: IntMap<ModificationId, usize>,
    pub placements: Vec<(Site, ModificationId)>,
    pub mono_shift: f64,
    pub average_shift: f64,
}

impl ModificationCombination {
    pub fn num_modifications(&self) -> usize {
        self.placements.len()
    }
}

#[derive(Debug, Clone, Default)]
struct PartialCombination {
    counts: IntMap<ModificationId, usize>,
    category_counts: [usize; 3],
    placements: Vec<(Site, ModificationId)>,
    shift: f64,
    mono_shift: f64,
    average_shift: f64,
    cations: usize,
    dehydro: usize,
}

/// Depth first enumeration of the modification placements of a peptide.
///
/// Each site holds no modification or one of its options. Branches that
/// can no longer reach the mass window are cut using the best and worst
/// shift the remaining sites could add. The state lives in an explicit
/// stack, so the iterator can be cloned and restarted at any point.
#[derive(Debug, Clone)]
pub struct ModificationCombinations<'a> {
    table: &'a ModificationTable,
    sites: Vec<SiteOptions>,
    window: MassRange,
    max_cations: usize,
    // Indexed by site, over sites[i..]
    suffix_pos: Vec<f64>,
    suffix_neg: Vec<f64>,
    suffix_max_pos: Vec<f64>,
    suffix_min_neg: Vec<f64>,
    // Choice taken on each visited site, 0 is none and k is options[k - 1].
    stack: Vec<usize>,
    partial: PartialCombination,
    done: bool,
}

impl<'a> ModificationCombinations<'a> {
    pub fn new(
        table: &'a ModificationTable,
        sites: Vec<SiteOptions>,
        window: MassRange,
        charge: u8,
    ) -> Self {
        let n = sites.len();
        let mut suffix_pos = vec![0.0_f64; n + 1];
        let mut suffix_neg = vec![0.0_f64; n + 1];
        let mut suffix_max_pos = vec![0.0_f64; n + 1];
        let mut suffix_min_neg = vec![0.0_f64; n + 1];
        for i in (0..n).rev() {
            let shifts = sites[i].options.iter().map(|id| table.entry(*id).shift);
            let best = shifts.clone().fold(0.0_f64, f64::max);
            let worst = shifts.fold(0.0_f64, f64::min);
            suffix_pos[i] = suffix_pos[i + 1] + best;
            suffix_neg[i] = suffix_neg[i + 1] + worst;
            suffix_max_pos[i] = suffix_max_pos[i + 1].max(best);
            suffix_min_neg[i] = suffix_min_neg[i + 1].min(worst);
        }

        Self {
            table,
            sites,
            window,
            max_cations: charge.max(1) as usize,
            suffix_pos,
            suffix_neg,
            suffix_max_pos,
            suffix_min_neg,
            stack: Vec::new(),
            partial: PartialCombination::default(),
            done: false,
        }
    }

    /// Starts the enumeration over from the first combination.
    pub fn restart(&mut self) {
        self.stack.clear();
        self.partial = PartialCombination::default();
        self.done = false;
    }

    fn is_pruned(&self, depth: usize) -> bool {
        let remaining = (self.table.max_levels() - self.partial.placements.len()) as f64;
        let upper = self.suffix_pos[depth].min(remaining * self.suffix_max_pos[depth]);
        let lower = self.suffix_neg[depth].max(remaining * self.suffix_min_neg[depth]);
        self.partial.shift + upper < self.window.start() - PRUNE_SLACK
            || self.partial.shift + lower > self.window.end() + PRUNE_SLACK
    }

    fn can_add(&self, id: ModificationId) -> bool {
        let entry = self.table.entry(id);
        let partial = &self.partial;
        if partial.placements.len() >= self.table.max_levels() {
            return false;
        }
        if partial.counts.get(&id).copied().unwrap_or(0) >= entry.cap {
            return false;
        }
        let category = entry.category;
        if partial.category_counts[category.index()]
            >= self.table.category_limits().limit(category)
        {
            return false;
        }
        match entry.modification.kind {
            ModificationKind::Standard => true,
            ModificationKind::Dehydro => partial.cations == 0,
            ModificationKind::Cation => {
                partial.dehydro == 0 && partial.cations < self.max_cations
            }
        }
    }

    fn add(&mut self, depth: usize, id: ModificationId) {
        let entry = self.table.entry(id);
        let partial = &mut self.partial;
        *partial.counts.entry(id).or_insert(0) += 1;
        partial.category_counts[entry.category.index()] += 1;
        partial.placements.push((self.sites[depth].site, id));
        partial.shift += entry.shift;
        partial.mono_shift += entry.modification.mono_shift;
        partial.average_shift += entry.modification.average_shift;
        match entry.modification.kind {
            ModificationKind::Standard => {}
            ModificationKind::Dehydro => partial.dehydro += 1,
            ModificationKind::Cation => partial.cations += 1,
        }
    }

    fn remove(&mut self, id: ModificationId) {
        let entry = self.table.entry(id);
        let partial = &mut self.partial;
        if let Some(count) = partial.counts.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                partial.counts.remove(&id);
            }
        }
        partial.category_counts[entry.category.index()] -= 1;
        partial.placements.pop();
        partial.shift -= entry.shift;
        partial.mono_shift -= entry.modification.mono_shift;
        partial.average_shift -= entry.modification.average_shift;
        match entry.modification.kind {
            ModificationKind::Standard => {}
            ModificationKind::Dehydro => partial.dehydro -= 1,
            ModificationKind::Cation => partial.cations -= 1,
        }
    }

    // Moves the deepest frame to its next admissible choice, popping the
    // exhausted frames. `false` once the whole tree was visited.
    fn backtrack(&mut self) -> bool {
        while let Some(choice) = self.stack.pop() {
            let depth = self.stack.len();
            if choice > 0 {
                let id = self.sites[depth].options[choice - 1];
                self.remove(id);
            }
            for next in (choice + 1)..=self.sites[depth].options.len() {
                let id = self.sites[depth].options[next - 1];
                if self.can_add(id) {
                    self.add(depth, id);
                    self.stack.push(next);
                    return true;
                }
            }
        }
        false
    }

    fn snapshot(&self) -> ModificationCombination {
        // Recomputed from the placements so the reported shifts do not
        // carry the add and remove drift.
        let (mono_shift, average_shift) = self
            .partial
            .placements
            .iter()
            .map(|(_, id)| &self.table.entry(*id).modification)
            .fold((0.0, 0.0), |(m, a), x| (m + x.mono_shift, a + x.average_shift));
        ModificationCombination {
            counts: self.partial.counts.clone(),
            placements: self.partial.placements.clone(),
            mono_shift,
            average_shift,
        }
    }
}

impl Iterator for ModificationCombinations<'_> {
    type Item = ModificationCombination;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let depth = self.stack.len();
            if depth == self.sites.len() {
                let found = if !self.partial.placements.is_empty()
                    && self.window.contains(self.partial.shift)
                {
                    Some(self.snapshot())
                } else {
                    None
                };
                if !self.backtrack() {
                    self.done = true;
                }
                if found.is_some() {
                    return found;
                }
            } else if self.is_pruned(depth) {
                if !self.backtrack() {
                    self.done = true;
                }
            } else {
                self.stack.push(0);
            }
        }
        None
    }
}
