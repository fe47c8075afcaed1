//! Maximal marginal relevance selection
//!
//! Greedy re-ranking that trades redundancy reduction against pure
//! relevance: each step picks the candidate maximizing
//! `lambda * relevance - (1 - lambda) * max_similarity_to_selected`.

/// Cosine similarity between two vectors. Zero for mismatched lengths or
/// zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// One MMR candidate: its relevance to the query and its embedding
#[derive(Debug, Clone)]
pub struct MmrCandidate {
    pub relevance: f32,
    pub embedding: Vec<f32>,
}

/// Greedily select up to `k` candidate indices by maximal marginal
/// relevance.
///
/// `lambda = 1.0` degenerates to pure relevance order; `lambda = 0.0`
/// is maximally diversity-driven.
pub fn mmr_select(candidates: &[MmrCandidate], k: usize, lambda: f32) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&candidates[idx].embedding, &candidates[s].embedding))
                .fold(0.0f32, f32::max);

            let score = lambda * candidates[idx].relevance - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(relevance: f32, embedding: Vec<f32>) -> MmrCandidate {
        MmrCandidate {
            relevance,
            embedding,
        }
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_full_relevance_weight_keeps_relevance_order() {
        // Candidates sorted by relevance; two near-duplicates at the top
        let candidates = vec![
            candidate(0.9, vec![1.0, 0.0, 0.0]),
            candidate(0.85, vec![0.99, 0.1, 0.0]),
            candidate(0.5, vec![0.0, 1.0, 0.0]),
        ];

        let picked = mmr_select(&candidates, 2, 1.0);
        assert_eq!(picked, vec![0, 1]);
    }

    #[test]
    fn test_zero_relevance_weight_maximizes_diversity() {
        let candidates = vec![
            candidate(0.9, vec![1.0, 0.0, 0.0]),
            candidate(0.85, vec![0.99, 0.1, 0.0]),
            candidate(0.5, vec![0.0, 1.0, 0.0]),
        ];

        // Pure diversity: the near-duplicate of the first pick loses to
        // the orthogonal candidate
        let picked = mmr_select(&candidates, 2, 0.0);
        assert_eq!(picked[0], 0);
        assert_eq!(picked[1], 2);
    }

    #[test]
    fn test_select_caps_at_candidate_count() {
        let candidates = vec![candidate(0.9, vec![1.0, 0.0])];
        let picked = mmr_select(&candidates, 5, 0.5);
        assert_eq!(picked, vec![0]);
    }
}
