//! Feature binning and gradient histograms.
//!
//! Every feature is discretised into at most `max_bins` bins once per fit.
//! Split search then scans per-bin gradient/hessian sums instead of sorted
//! raw values. Bin `b` covers `(t[b-1], t[b]]`, so "bin <= b" is the same
//! predicate as "x <= t[b]" and trees can store raw thresholds.

/// Per-feature bin boundaries fit on the training matrix.
#[derive(Debug, Clone)]
pub struct BinMapper {
    thresholds: Vec<Vec<f64>>,
}

impl BinMapper {
    pub fn fit(rows: &[Vec<f64>], max_bins: usize) -> Self {
        let n_features = rows.first().map_or(0, Vec::len);
        let max_bins = max_bins.clamp(2, usize::from(u8::MAX) + 1);
        let thresholds = (0..n_features)
            .map(|j| {
                let mut values: Vec<f64> = rows.iter().map(|r| r[j]).filter(|v| !v.is_nan()).collect();
                values.sort_by(f64::total_cmp);
                feature_thresholds(&values, max_bins)
            })
            .collect();
        Self { thresholds }
    }

    pub fn n_features(&self) -> usize {
        self.thresholds.len()
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }

    /// Upper boundary of `bin`, used as the split threshold.
    pub fn threshold(&self, feature: usize, bin: usize) -> f64 {
        self.thresholds[feature][bin]
    }

    pub fn bin(&self, feature: usize, value: f64) -> u8 {
        let t = &self.thresholds[feature];
        if value.is_nan() {
            // NaN fails every `x <= t` test and lands in the last bin
            return u8::try_from(t.len()).unwrap_or(u8::MAX);
        }
        let b = t.partition_point(|edge| *edge < value);
        u8::try_from(b).unwrap_or(u8::MAX)
    }
}

/// Midpoints between distinct values, or quantile cuts when there are more
/// distinct values than bins.
fn feature_thresholds(sorted: &[f64], max_bins: usize) -> Vec<f64> {
    let mut distinct: Vec<f64> = sorted.to_vec();
    distinct.dedup();
    if distinct.len() <= 1 {
        return Vec::new();
    }
    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }

    let n = sorted.len();
    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|q| {
            let idx = (q * n / max_bins).min(n - 1);
            let hi = sorted[idx];
            let lo = sorted[idx.saturating_sub(1)];
            if hi > lo { (hi + lo) / 2.0 } else { hi }
        })
        .collect();
    cuts.dedup();
    // The largest value must stay right of the last cut for the split to separate anything
    if let (Some(last_cut), Some(max)) = (cuts.last().copied(), sorted.last().copied()) {
        if last_cut >= max {
            cuts.pop();
        }
    }
    cuts
}

/// Column-major binned copy of the training matrix.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    n_rows: usize,
    bins: Vec<u8>,
}

impl BinnedMatrix {
    pub fn new(rows: &[Vec<f64>], mapper: &BinMapper) -> Self {
        let n_rows = rows.len();
        let mut bins = Vec::with_capacity(n_rows * mapper.n_features());
        for j in 0..mapper.n_features() {
            bins.extend(rows.iter().map(|r| mapper.bin(j, r[j])));
        }
        Self { n_rows, bins }
    }

    #[inline]
    pub fn bin(&self, row: usize, feature: usize) -> u8 {
        self.bins[feature * self.n_rows + row]
    }

    fn column(&self, feature: usize) -> &[u8] {
        &self.bins[feature * self.n_rows..(feature + 1) * self.n_rows]
    }
}

/// Gradient statistics of one bin (or one node when summed).
#[derive(Debug, Clone, Copy, Default)]
pub struct BinStat {
    pub grad: f64,
    pub hess: f64,
    pub count: usize,
}

impl BinStat {
    fn add(&mut self, grad: f64, hess: f64) {
        self.grad += grad;
        self.hess += hess;
        self.count += 1;
    }

    pub fn sub(self, other: Self) -> Self {
        Self {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count.saturating_sub(other.count),
        }
    }
}

/// Gradient histogram over all features for one node's rows.
pub struct Histogram {
    offsets: Vec<usize>,
    stats: Vec<BinStat>,
}

impl Histogram {
    pub fn build(matrix: &BinnedMatrix, mapper: &BinMapper, rows: &[usize], grad: &[f64], hess: &[f64]) -> Self {
        let mut offsets = Vec::with_capacity(mapper.n_features() + 1);
        let mut total = 0;
        for j in 0..mapper.n_features() {
            offsets.push(total);
            total += mapper.n_bins(j);
        }
        offsets.push(total);

        let mut stats = vec![BinStat::default(); total];
        for j in 0..mapper.n_features() {
            let column = matrix.column(j);
            let base = offsets[j];
            for &r in rows {
                stats[base + usize::from(column[r])].add(grad[r], hess[r]);
            }
        }
        Self { offsets, stats }
    }

    pub fn feature(&self, feature: usize) -> &[BinStat] {
        &self.stats[self.offsets[feature]..self.offsets[feature + 1]]
    }
}
