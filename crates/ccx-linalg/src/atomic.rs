//! Lock-free accumulation of scalars from parallel row kernels.
//!
//! The transposed multiply scatters contributions from many rows into the
//! same output slot. Each scalar lane lives in an `AtomicU64` holding the
//! bits of an `f64` and is updated with a compare-exchange loop.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::scalar::Scalar;

/// Atomic float addition on the bit pattern of an `f64`.
#[inline]
pub(crate) fn atomic_add(atomic: &AtomicU64, val: f64) {
    let mut old = atomic.load(Ordering::Relaxed);
    loop {
        let new = f64::from_bits(old) + val;
        match atomic.compare_exchange_weak(old, new.to_bits(), Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => break,
            Err(x) => old = x,
        }
    }
}

/// Vector of scalars that may be added to concurrently.
pub(crate) struct AtomicAccumulator {
    lanes: Vec<AtomicU64>,
    width: usize,
}

impl AtomicAccumulator {
    /// Seed the accumulator with the current contents of `y`.
    pub(crate) fn from_slice<T: Scalar>(y: &[T]) -> Self {
        let width = T::PARTS;
        let mut lanes = Vec::with_capacity(y.len() * width);
        for &v in y {
            let l = v.to_lanes();
            for &lane in &l[..width] {
                lanes.push(AtomicU64::new(lane.to_bits()));
            }
        }
        Self { lanes, width }
    }

    /// Thread-safe `y[index] += value`.
    #[inline]
    pub(crate) fn add<T: Scalar>(&self, index: usize, value: T) {
        let l = value.to_lanes();
        let base = index * self.width;
        for k in 0..self.width {
            if l[k] != 0.0 {
                atomic_add(&self.lanes[base + k], l[k]);
            }
        }
    }

    /// Write the accumulated values back.
    pub(crate) fn store_into<T: Scalar>(self, y: &mut [T]) {
        let width = self.width;
        for (i, v) in y.iter_mut().enumerate() {
            let mut l = [0.0; 2];
            for k in 0..width {
                l[k] = f64::from_bits(self.lanes[i * width + k].load(Ordering::Relaxed));
            }
            *v = T::from_lanes(l);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;
    use rayon::prelude::*;

    #[test]
    fn parallel_adds_are_not_lost() {
        let y = vec![1.0f64; 4];
        let acc = AtomicAccumulator::from_slice(&y);
        (0..4000usize).into_par_iter().for_each(|i| acc.add(i % 4, 0.5f64));
        let mut out = vec![0.0f64; 4];
        acc.store_into(&mut out);
        assert_eq!(out, vec![501.0; 4]);
    }

    #[test]
    fn complex_lanes_accumulate_independently() {
        let y = vec![Complex::new(1.0f64, -1.0)];
        let acc = AtomicAccumulator::from_slice(&y);
        acc.add(0, Complex::new(2.0f64, 3.0));
        let mut out = vec![Complex::new(0.0, 0.0)];
        acc.store_into(&mut out);
        assert_eq!(out[0], Complex::new(3.0, 2.0));
    }
}
