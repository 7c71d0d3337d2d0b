//! Paged storage of one process's amplitude segment.
//!
//! The local address space of `l` bits is split as `l = g + p`: the low
//! `g` bits index inside a page, the high `p` bits select one of `2^p`
//! page buffers. Pages are reordered by swapping their handles, never by
//! copying amplitudes.

use crate::math::{c_one, c_zero, low_ones, C, Mask, N, Real};

#[cfg(feature = "multi-thread")]
use rayon::prelude::*;

#[derive(Clone, Debug)]
pub(crate) struct PageTable<T: Real> {
    pages: Vec<Vec<C<T>>>,
    unit_qubits: N,
}

impl<T: Real> PageTable<T> {
    pub fn new(num_page_qubits: N, unit_qubits: N) -> Self {
        Self {
            pages: (0..1usize << num_page_qubits)
                .map(|_| vec![c_zero(); 1 << unit_qubits])
                .collect(),
            unit_qubits,
        }
    }

    #[inline]
    pub fn unit_qubits(&self) -> N {
        self.unit_qubits
    }

    #[inline]
    pub fn page_len(&self) -> N {
        1 << self.unit_qubits
    }

    #[inline]
    pub fn num_pages(&self) -> N {
        self.pages.len()
    }

    #[inline]
    pub fn local_len(&self) -> N {
        self.num_pages() * self.page_len()
    }

    #[inline]
    pub fn get(&self, local_idx: Mask) -> C<T> {
        self.pages[local_idx >> self.unit_qubits][local_idx & low_ones(self.unit_qubits)]
    }

    #[inline]
    pub fn set(&mut self, local_idx: Mask, amp: C<T>) {
        let g = self.unit_qubits;
        self.pages[local_idx >> g][local_idx & low_ones(g)] = amp;
    }

    #[inline]
    pub fn page(&self, idx: N) -> &[C<T>] {
        &self.pages[idx]
    }

    #[inline]
    pub fn page_mut(&mut self, idx: N) -> &mut [C<T>] {
        &mut self.pages[idx]
    }

    /// O(1) exchange of two page handles.
    pub fn swap_pages(&mut self, i: N, j: N) {
        self.pages.swap(i, j);
    }

    /// Mutable views of two distinct pages.
    pub fn two_pages_mut(&mut self, i: N, j: N) -> (&mut [C<T>], &mut [C<T>]) {
        debug_assert!(i != j);
        let (lo, hi) = (i.min(j), i.max(j));
        let (head, tail) = self.pages.split_at_mut(hi);
        let (a, b) = (&mut head[lo][..], &mut tail[0][..]);
        if i < j {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Run `f(page_index, page)` over every page, in parallel when the
    /// `multi-thread` feature is enabled.
    pub fn for_each_page<F>(&mut self, f: F)
    where
        F: Fn(N, &mut [C<T>]) + Send + Sync,
    {
        #[cfg(feature = "multi-thread")]
        {
            self.pages
                .par_iter_mut()
                .enumerate()
                .for_each(|(pi, page)| f(pi, &mut page[..]));
        }
        #[cfg(not(feature = "multi-thread"))]
        {
            for (pi, page) in self.pages.iter_mut().enumerate() {
                f(pi, &mut page[..]);
            }
        }
    }

    pub fn fill_zero(&mut self) {
        for page in &mut self.pages {
            page.fill(c_zero());
        }
    }

    pub fn reset_to(&mut self, local_idx: Option<Mask>) {
        self.fill_zero();
        if let Some(idx) = local_idx {
            self.set(idx, c_one());
        }
    }

    pub fn norm_sqr(&self) -> T {
        self.pages
            .iter()
            .map(|page| page.iter().map(|amp| amp.norm_sqr()).sum::<T>())
            .sum()
    }

    /// Multiply every amplitude by a real scale.
    pub fn scale(&mut self, scale: T) {
        self.for_each_page(|_, page| {
            for amp in page.iter_mut() {
                *amp = amp.scale(scale);
            }
        });
    }
}
