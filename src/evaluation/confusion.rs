//! 帧级混淆矩阵与一致性指标
//! Frame-level confusion counts, ratios and Cohen's kappa

use serde::Serialize;

/// 2×2 混淆矩阵
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tn: usize,
}

impl ConfusionCounts {
    /// 逐帧比较 (按较短序列长度)
    pub fn from_pairs(y_true: &[bool], y_pred: &[bool]) -> Self {
        let mut counts = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t, p) {
                (true, true) => counts.tp += 1,
                (false, true) => counts.fp += 1,
                (true, false) => counts.fn_ += 1,
                (false, false) => counts.tn += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.fn_ + self.tn
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    pub fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }

    /// Cohen's kappa
    ///
    /// 真值没有变化 (全真或全假) 时: 预测完全一致为 1.0, 否则为 0.0。
    /// 空序列为 0.0。
    pub fn kappa(&self) -> f64 {
        let n = self.total();
        if n == 0 {
            return 0.0;
        }
        let positives = self.tp + self.fn_;
        if positives == 0 || positives == n {
            return if self.fp + self.fn_ == 0 { 1.0 } else { 0.0 };
        }

        let n = n as f64;
        let observed = (self.tp + self.tn) as f64 / n;
        let pred_pos = (self.tp + self.fp) as f64;
        let pred_neg = (self.fn_ + self.tn) as f64;
        let expected =
            (pred_pos * positives as f64 + pred_neg * (self.fp + self.tn) as f64) / (n * n);
        if (1.0 - expected).abs() < f64::EPSILON {
            return 0.0;
        }
        (observed - expected) / (1.0 - expected)
    }
}

/// 分母为 0 时返回 0.0
pub fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// 从第0帧开始每 `stride` 帧取一帧
pub fn subsample(xs: &[bool], stride: usize) -> Vec<bool> {
    xs.iter().step_by(stride.max(1)).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn test_counts_and_ratios() {
        let counts = ConfusionCounts::from_pairs(&bits("1100110000"), &bits("1010100001"));
        assert_eq!(
            counts,
            ConfusionCounts {
                tp: 2,
                fp: 2,
                fn_: 2,
                tn: 4
            }
        );
        assert!((counts.recall() - 0.5).abs() < 1e-9);
        assert!((counts.precision() - 0.5).abs() < 1e-9);
        assert!((counts.f1() - 0.5).abs() < 1e-9);
        assert!((counts.accuracy() - 0.6).abs() < 1e-9);
        // po = 0.6, pe = (4*4 + 6*6) / 100 = 0.52
        assert!((counts.kappa() - (0.6 - 0.52) / 0.48).abs() < 1e-9);
    }

    #[test]
    fn test_identical_mixed_sequences_kappa_one() {
        let y = bits("0011100110");
        let counts = ConfusionCounts::from_pairs(&y, &y);
        assert!((counts.kappa() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_truth_kappa_policy() {
        let zeros = bits("0000");
        assert_eq!(ConfusionCounts::from_pairs(&zeros, &zeros).kappa(), 1.0);
        assert_eq!(ConfusionCounts::from_pairs(&zeros, &bits("0100")).kappa(), 0.0);
        let ones = bits("1111");
        assert_eq!(ConfusionCounts::from_pairs(&ones, &ones).kappa(), 1.0);
        assert_eq!(ConfusionCounts::default().kappa(), 0.0);
    }

    #[test]
    fn test_all_false_has_no_nan() {
        let counts = ConfusionCounts::from_pairs(&[false; 50], &[false; 50]);
        for v in [counts.recall(), counts.precision(), counts.f1()] {
            assert_eq!(v, 0.0);
        }
        assert_eq!(counts.accuracy(), 1.0);
    }

    #[test]
    fn test_subsample() {
        let xs = bits("1001001001");
        assert_eq!(subsample(&xs, 3), vec![true, true, true, true]);
        assert_eq!(subsample(&xs, 1), xs);
        assert_eq!(subsample(&xs, 0), xs);
        assert!(subsample(&[], 4).is_empty());
    }
}
