pub use self::types::*;

pub mod approx_cmp;
pub mod index;

mod types {
    use std::{fmt, iter::Sum};

    use num_traits::{Float, FloatConst, NumAssign};

    /// Qubit counts, qubit positions and loop counters.
    pub type N = usize;
    /// Amplitude indices and bit patterns over them.
    pub type Mask = usize;

    /// Complex amplitude of configurable precision.
    pub type C<T> = num_complex::Complex<T>;

    /// Scalar precision of the amplitude vector.
    ///
    /// Implemented for `f32` and `f64`; every public type of the crate is
    /// generic over it.
    pub trait Real:
        Float + FloatConst + NumAssign + Sum + fmt::Debug + fmt::Display + Send + Sync + 'static
    {
        fn from_f64(x: f64) -> Self;

        fn to_f64(self) -> f64;
    }

    impl Real for f32 {
        #[inline(always)]
        fn from_f64(x: f64) -> Self {
            x as f32
        }

        #[inline(always)]
        fn to_f64(self) -> f64 {
            self as f64
        }
    }

    impl Real for f64 {
        #[inline(always)]
        fn from_f64(x: f64) -> Self {
            x
        }

        #[inline(always)]
        fn to_f64(self) -> f64 {
            self
        }
    }
}

#[inline]
pub fn c_zero<T: Real>() -> C<T> {
    C::new(T::zero(), T::zero())
}

#[inline]
pub fn c_one<T: Real>() -> C<T> {
    C::new(T::one(), T::zero())
}

#[inline]
pub fn c_i<T: Real>() -> C<T> {
    C::new(T::zero(), T::one())
}

/// `i^q` for any exponent.
#[inline]
pub fn i_pow<T: Real>(q: N) -> C<T> {
    match q & 0b11 {
        0 => c_one(),
        1 => c_i(),
        2 => -c_one::<T>(),
        _ => -c_i::<T>(),
    }
}

#[inline]
pub fn phase_from_rad<T: Real>(rad: T) -> C<T> {
    C::from_polar(T::one(), rad)
}

#[inline]
pub fn count_bits(n: Mask) -> N {
    n.count_ones() as N
}

/// A mask with the `b` lowest bits set.
#[inline]
pub fn low_ones(b: N) -> Mask {
    if b >= Mask::BITS as N {
        !0
    } else {
        (1usize << b) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i_pow_cycle() {
        let i: C<f64> = c_i();
        for q in 0..16 {
            let mut by_mul = c_one();
            for _ in 0..q {
                by_mul *= i;
            }
            assert_eq!(i_pow::<f64>(q), by_mul);
        }
    }

    #[test]
    fn low_ones_edges() {
        assert_eq!(low_ones(0), 0);
        assert_eq!(low_ones(3), 0b111);
        assert_eq!(low_ones(usize::BITS as N), !0);
    }
}
