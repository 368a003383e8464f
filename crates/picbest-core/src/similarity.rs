use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use crate::ThrottledProgress;

/// Whole-image or region-crop embedding vector, supplied by the
/// embedding collaborator.
pub type Embedding = Vec<f32>;

/// Named similarity threshold presets.
pub const SIMILARITY_PRESETS: &[(&str, f32)] = &[
    ("same", 0.989),
    ("almost_same", 0.978),
    ("very_similar", 0.96),
    ("similar", 0.94),
    ("not_same_same_location", 0.90),
    ("not_same_very_similar_location", 0.80),
    ("not_same_similar_location", 0.70),
    ("dissimilar", 0.60),
];

/// Look up a preset threshold by name.
pub fn preset_threshold(name: &str) -> Option<f32> {
    SIMILARITY_PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, t)| *t)
}

/// Cosine similarity between two embedding vectors.
/// Returns 0.0 for mismatched lengths or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Pairwise similarity source. Implementations must be cheap to call
/// concurrently; scoring is a pure function of the two ids.
pub trait SimilarityScorer: Sync {
    /// Similarity in [0,1], or None when either id cannot be scored.
    /// A None pair is skipped during grouping, never treated as 0.
    fn score(&self, a: &Path, b: &Path) -> Option<f32>;
}

/// Cosine similarity over whole-image embeddings.
pub struct CosineScorer<'a> {
    embeddings: &'a HashMap<PathBuf, Embedding>,
}

impl<'a> CosineScorer<'a> {
    pub fn new(embeddings: &'a HashMap<PathBuf, Embedding>) -> Self {
        Self { embeddings }
    }
}

impl SimilarityScorer for CosineScorer<'_> {
    fn score(&self, a: &Path, b: &Path) -> Option<f32> {
        let ea = self.embeddings.get(a)?;
        let eb = self.embeddings.get(b)?;
        Some(cosine_similarity(ea, eb))
    }
}

/// Blends the whole-image score with region-crop scores.
///
/// Region vectors are ordered center, top-left, top-right, bottom-left,
/// bottom-right and truncated to `region_count`. The whole image weighs
/// 2.0 and every region 1.0; regions missing on either side simply do
/// not contribute. With `region_count` <= 1 this degrades to the plain
/// whole-image score.
pub struct RegionScorer<'a> {
    whole: CosineScorer<'a>,
    regions: &'a HashMap<PathBuf, Vec<Embedding>>,
    region_count: usize,
}

impl<'a> RegionScorer<'a> {
    pub fn new(
        embeddings: &'a HashMap<PathBuf, Embedding>,
        regions: &'a HashMap<PathBuf, Vec<Embedding>>,
        region_count: usize,
    ) -> Self {
        Self {
            whole: CosineScorer::new(embeddings),
            regions,
            region_count: region_count.min(5),
        }
    }
}

impl SimilarityScorer for RegionScorer<'_> {
    fn score(&self, a: &Path, b: &Path) -> Option<f32> {
        let full = self.whole.score(a, b)?;
        if self.region_count <= 1 {
            return Some(full);
        }
        let mut weighted_sum = 2.0 * full;
        let mut weight_total = 2.0;
        if let (Some(ra), Some(rb)) = (self.regions.get(a), self.regions.get(b)) {
            for k in 0..self.region_count.min(ra.len()).min(rb.len()) {
                weighted_sum += cosine_similarity(&ra[k], &rb[k]);
                weight_total += 1.0;
            }
        }
        Some(weighted_sum / weight_total)
    }
}

/// Disjoint-set over stable indices.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            // Path halving
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, i: usize, j: usize) {
        let pi = self.find(i);
        let pj = self.find(j);
        if pi == pj {
            return;
        }
        if self.rank[pi] < self.rank[pj] {
            self.parent[pi] = pj;
        } else if self.rank[pi] > self.rank[pj] {
            self.parent[pj] = pi;
        } else {
            self.parent[pj] = pi;
            self.rank[pi] += 1;
        }
    }
}

/// Partition `ids` into groups of similar images.
///
/// Every unordered pair is scored (in parallel) and pairs at or above
/// `threshold` merge their groups. Merging is single-link: one
/// qualifying link chains clusters transitively. The resulting
/// partition does not depend on pair-enumeration order; group order and
/// member order follow the input id order.
pub fn group_similar(
    ids: &[PathBuf],
    scorer: &dyn SimilarityScorer,
    threshold: f32,
    progress: &ThrottledProgress,
) -> Vec<Vec<PathBuf>> {
    let n = ids.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .collect();
    let total = pairs.len() as u64;
    let counter = AtomicU64::new(0);

    // Score all pairs concurrently; merges stay on this thread since
    // group membership is shared mutable state.
    let matches: Vec<(usize, usize)> = pairs
        .par_iter()
        .filter_map(|&(i, j)| {
            let sim = scorer.score(&ids[i], &ids[j]);
            let current = counter.fetch_add(1, Ordering::Relaxed);
            progress.report("group", current, total, "Comparing images");
            match sim {
                Some(s) if s >= threshold => Some((i, j)),
                _ => None,
            }
        })
        .collect();

    let mut uf = UnionFind::new(n);
    for (i, j) in matches {
        uf.union(i, j);
    }

    let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<PathBuf>> = Vec::new();
    for (i, id) in ids.iter().enumerate() {
        let root = uf.find(i);
        let slot = *slot_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(id.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    fn quiet() -> &'static crate::ProgressCallback {
        &|_, _, _, _| {}
    }

    /// Scorer backed by a fixed pair table, for deterministic tests.
    struct TableScorer(HashMap<(PathBuf, PathBuf), f32>);

    impl TableScorer {
        fn new(entries: &[(&str, &str, f32)]) -> Self {
            let mut map = HashMap::new();
            for (a, b, s) in entries {
                map.insert((p(a), p(b)), *s);
                map.insert((p(b), p(a)), *s);
            }
            Self(map)
        }
    }

    impl SimilarityScorer for TableScorer {
        fn score(&self, a: &Path, b: &Path) -> Option<f32> {
            self.0.get(&(a.to_path_buf(), b.to_path_buf())).copied()
        }
    }

    fn as_partition(groups: &[Vec<PathBuf>]) -> HashSet<Vec<PathBuf>> {
        groups
            .iter()
            .map(|g| {
                let mut g = g.clone();
                g.sort();
                g
            })
            .collect()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(preset_threshold("very_similar"), Some(0.96));
        assert_eq!(preset_threshold("same"), Some(0.989));
        assert_eq!(preset_threshold("bogus"), None);
    }

    #[test]
    fn test_groups_partition_input() {
        let ids = vec![p("a"), p("b"), p("c"), p("d")];
        let scorer = TableScorer::new(&[
            ("a", "b", 0.99),
            ("a", "c", 0.10),
            ("a", "d", 0.10),
            ("b", "c", 0.10),
            ("b", "d", 0.10),
            ("c", "d", 0.10),
        ]);
        let tp = ThrottledProgress::new(quiet());
        let groups = group_similar(&ids, &scorer, 0.96, &tp);

        let flat: Vec<PathBuf> = groups.iter().flatten().cloned().collect();
        let unique: HashSet<&PathBuf> = flat.iter().collect();
        assert_eq!(flat.len(), ids.len());
        assert_eq!(unique.len(), ids.len());
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn test_single_link_chaining() {
        // A~B and B~C pass, A~C does not: all three end up together.
        let ids = vec![p("a"), p("b"), p("c")];
        let scorer = TableScorer::new(&[
            ("a", "b", 0.97),
            ("b", "c", 0.97),
            ("a", "c", 0.50),
        ]);
        let tp = ThrottledProgress::new(quiet());
        let groups = group_similar(&ids, &scorer, 0.96, &tp);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn test_partition_insensitive_to_enumeration_order() {
        let scorer = TableScorer::new(&[
            ("a", "b", 0.98),
            ("b", "c", 0.98),
            ("a", "c", 0.20),
            ("a", "d", 0.10),
            ("b", "d", 0.10),
            ("c", "d", 0.10),
        ]);
        let tp = ThrottledProgress::new(quiet());
        let forward = vec![p("a"), p("b"), p("c"), p("d")];
        let reversed = vec![p("d"), p("c"), p("b"), p("a")];
        let g1 = group_similar(&forward, &scorer, 0.96, &tp);
        let g2 = group_similar(&reversed, &scorer, 0.96, &tp);
        assert_eq!(as_partition(&g1), as_partition(&g2));
    }

    #[test]
    fn test_missing_embedding_pairs_are_skipped() {
        let mut embeddings = HashMap::new();
        embeddings.insert(p("a"), vec![1.0, 0.0]);
        embeddings.insert(p("b"), vec![1.0, 0.0]);
        // "c" has no embedding at all
        let ids = vec![p("a"), p("b"), p("c")];
        let scorer = CosineScorer::new(&embeddings);
        let tp = ThrottledProgress::new(quiet());
        let groups = group_similar(&ids, &scorer, 0.96, &tp);
        assert_eq!(groups.len(), 2);
        let singleton: Vec<_> = groups.iter().filter(|g| g.len() == 1).collect();
        assert_eq!(singleton.len(), 1);
        assert_eq!(singleton[0][0], p("c"));
    }

    #[test]
    fn test_region_blending_weights() {
        let mut embeddings = HashMap::new();
        embeddings.insert(p("a"), vec![1.0, 0.0]);
        embeddings.insert(p("b"), vec![1.0, 0.0]);
        // Center crops are orthogonal: whole sim 1.0, region sim 0.0.
        let mut regions = HashMap::new();
        regions.insert(p("a"), vec![vec![1.0, 0.0]]);
        regions.insert(p("b"), vec![vec![0.0, 1.0]]);

        // With one region requested only the whole image counts.
        let scorer = RegionScorer::new(&embeddings, &regions, 1);
        assert!((scorer.score(&p("a"), &p("b")).unwrap() - 1.0).abs() < 1e-6);

        // With two requested (one available): (2*1.0 + 0.0) / 3.
        let scorer = RegionScorer::new(&embeddings, &regions, 2);
        let blended = scorer.score(&p("a"), &p("b")).unwrap();
        assert!((blended - 2.0 / 3.0).abs() < 1e-6);
    }
}
