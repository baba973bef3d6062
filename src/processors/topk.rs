//! Top-k ranking of classification outputs.

/// Result of ranking one raw score vector.
#[derive(Debug, Clone, PartialEq)]
pub struct TopkResult {
    /// Class indexes, best first.
    pub indexes: Vec<usize>,
    /// Softmax confidence of each class in `indexes`, as a percentage.
    pub scores: Vec<f32>,
}

/// Extracts the `k` highest-scoring classes from a raw score vector.
#[derive(Debug, Clone)]
pub struct Topk {
    k: usize,
}

impl Topk {
    /// Creates a new Topk processor. `k` must be greater than zero.
    pub fn new(k: usize) -> Result<Self, String> {
        if k == 0 {
            return Err("k must be greater than 0".to_string());
        }
        Ok(Self { k })
    }

    /// The number of classes this processor returns.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Ranks `logits` and returns the top `k` with their softmax percentages.
    ///
    /// Ranking is by raw score, descending; equal scores keep ascending class
    /// order. Fails if `logits` holds fewer than `k` entries.
    pub fn process(&self, logits: &[f32]) -> Result<TopkResult, String> {
        if logits.len() < self.k {
            return Err(format!(
                "need at least {} class scores, got {}",
                self.k,
                logits.len()
            ));
        }

        let percentages = softmax_percent(logits);
        let indexes: Vec<usize> = rank_descending(logits).into_iter().take(self.k).collect();
        let scores = indexes.iter().map(|&idx| percentages[idx]).collect();

        Ok(TopkResult { indexes, scores })
    }
}

/// Softmax over `logits`, scaled to percentages in [0, 100].
///
/// The maximum is subtracted before exponentiation and the sum is
/// accumulated in `f64`, so large logits neither overflow nor lose mass.
pub fn softmax_percent(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }

    let max = logits
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&v| (v as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();

    exps.into_iter()
        .map(|e| (e / sum * 100.0) as f32)
        .collect()
}

/// Class indexes sorted by descending score, ties by ascending index.
pub fn rank_descending(scores: &[f32]) -> Vec<usize> {
    let mut indexes: Vec<usize> = (0..scores.len()).collect();
    // Stable sort keeps equal scores in ascending index order.
    indexes.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    indexes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topk_orders_by_score() {
        let topk = Topk::new(2).unwrap();
        let result = topk.process(&[0.1, 0.8, 0.1]).unwrap();
        assert_eq!(result.indexes, vec![1, 0]);
        assert!(result.scores[0] > result.scores[1]);
    }

    #[test]
    fn test_topk_invalid_k() {
        assert!(Topk::new(0).is_err());
    }

    #[test]
    fn test_topk_too_few_classes() {
        let topk = Topk::new(5).unwrap();
        assert!(topk.process(&[0.1, 0.8]).is_err());
    }

    #[test]
    fn test_ties_break_by_ascending_index() {
        let ranked = rank_descending(&[1.0, 3.0, 3.0, 0.5, 3.0]);
        assert_eq!(ranked, vec![1, 2, 4, 0, 3]);
    }

    #[test]
    fn test_softmax_sums_to_hundred() {
        let logits: Vec<f32> = (0..1000).map(|i| ((i * 37) % 101) as f32 / 7.0).collect();
        let percent = softmax_percent(&logits);
        let total: f64 = percent.iter().map(|&p| p as f64).sum();
        assert!((total - 100.0).abs() < 1e-3, "total was {total}");
        assert!(percent.iter().all(|&p| (0.0..=100.0).contains(&p)));
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let percent = softmax_percent(&[1000.0, 1000.0, -1000.0]);
        assert!((percent[0] - 50.0).abs() < 1e-4);
        assert!((percent[1] - 50.0).abs() < 1e-4);
        assert_eq!(percent[2], 0.0);
    }

    #[test]
    fn test_softmax_known_values() {
        let percent = softmax_percent(&[0.0, (3.0f32).ln()]);
        assert!((percent[0] - 25.0).abs() < 1e-4);
        assert!((percent[1] - 75.0).abs() < 1e-4);
    }
}
