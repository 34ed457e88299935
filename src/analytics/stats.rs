//! Small numeric helpers shared by the aggregators.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1). `None` below two values.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Pearson correlation in [-1, 1]. `None` on mismatched, short or constant input.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - mx;
        let dy = yi - my;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0))
}

/// Complementary error function (Abramowitz-Stegun 7.1.26, |err| < 1.5e-7).
pub fn erfc(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let z = x.abs();
    let t = 1.0 / (1.0 + p * z);
    let tail = (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-z * z).exp();

    if x >= 0.0 {
        tail
    } else {
        2.0 - tail
    }
}

/// Upper tail of the chi-square distribution with one degree of freedom.
pub fn chi_square_p_value_1df(statistic: f64) -> f64 {
    if !statistic.is_finite() || statistic <= 0.0 {
        return 1.0;
    }
    erfc((statistic / 2.0).sqrt()).clamp(0.0, 1.0)
}

/// 2x2 contingency test result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquare {
    pub statistic: f64,
    pub p_value: f64,
    /// Smallest expected cell count under independence.
    pub min_expected: f64,
}

/// Yates-corrected chi-square for the table
///
/// ```text
///            present  absent
/// group 1       a       b
/// group 2       c       d
/// ```
///
/// `None` when a row or column total is zero.
pub fn chi_square_2x2(a: usize, b: usize, c: usize, d: usize) -> Option<ChiSquare> {
    let (a, b, c, d) = (a as f64, b as f64, c as f64, d as f64);
    let n = a + b + c + d;
    let row1 = a + b;
    let row2 = c + d;
    let col1 = a + c;
    let col2 = b + d;
    if row1 == 0.0 || row2 == 0.0 || col1 == 0.0 || col2 == 0.0 {
        return None;
    }

    let min_expected = [row1 * col1, row1 * col2, row2 * col1, row2 * col2]
        .iter()
        .map(|x| x / n)
        .fold(f64::INFINITY, f64::min);

    let diff = ((a * d - b * c).abs() - n / 2.0).max(0.0);
    let statistic = n * diff * diff / (row1 * row2 * col1 * col2);

    Some(ChiSquare {
        statistic,
        p_value: chi_square_p_value_1df(statistic),
        min_expected,
    })
}

pub fn round4(x: f64) -> f64 {
    (x * 10000.0).round() / 10000.0
}
