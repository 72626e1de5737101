// crates/cm_foundation/src/numerics.rs

//! Kahan 补偿求和
//!
//! 质量守恒校验需要对上万个 `Δz·A` 求和，普通累加的舍入误差会被误判为
//! 质量残差，因此所有体积统计都走这里。

/// Kahan 求和器
///
/// # 示例
///
/// ```
/// use cm_foundation::KahanSum;
///
/// let sum = KahanSum::sum_iter(std::iter::repeat(0.1).take(1000));
/// assert!((sum - 100.0).abs() < 1e-10);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    /// 创建新的求和器
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个值
    #[inline]
    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    /// 获取当前求和值
    #[inline]
    pub fn value(&self) -> f64 {
        self.sum
    }

    /// 重置求和器
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 从迭代器求和
    pub fn sum_iter<I: IntoIterator<Item = f64>>(iter: I) -> f64 {
        let mut kahan = Self::new();
        for v in iter {
            kahan.add(v);
        }
        kahan.value()
    }

    /// 加权求和 `Σ values[i] * weights[i]`
    ///
    /// 长度不一致时按较短者截断。
    pub fn dot(values: &[f64], weights: &[f64]) -> f64 {
        Self::sum_iter(values.iter().zip(weights).map(|(v, w)| v * w))
    }
}

impl Extend<f64> for KahanSum {
    fn extend<T: IntoIterator<Item = f64>>(&mut self, iter: T) {
        for v in iter {
            self.add(v);
        }
    }
}
