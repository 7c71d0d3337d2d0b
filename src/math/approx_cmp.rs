use float_cmp::approx_eq;

const ULPS: i64 = 4;

#[inline]
pub(crate) fn approx_eq_real(x: f64, y: f64) -> bool {
    approx_eq!(f64, x, y, ulps = ULPS)
}

#[inline]
pub(crate) fn approx_zero(x: f64) -> bool {
    approx_eq!(f64, x, 0.0, ulps = ULPS)
}
