//! Distributed backend.
//!
//! Each process owns `2^l` contiguous amplitudes of the physical index
//! space; its rank supplies the high `n - l` bits. The segment is stored
//! as a page table, and a qubit permutation decouples logical qubit
//! identity from physical bit positions. A gate on a qubit whose
//! physical position is global first interchanges that qubit with a page
//! position by exchanging half-segments with XOR partner processes;
//! diagonal gates skip the interchange entirely.

use rand::{rngs::StdRng, Rng};

use super::{
    local::{mod_pow, renorm_scale},
    page::PageTable,
    StateVector,
};
use crate::comm::Communicator;
use crate::error::Result;
use crate::math::{
    approx_cmp::approx_zero, c_one, c_zero, count_bits, index::IndexMasks, low_ones, C, Mask, N,
    Real,
};
use crate::operator::{
    kernel::{apply_flat, Ctrl},
    Gate, Kind,
};
use crate::permutation::Permutation;

pub struct ClusterState<T: Real, M: Communicator<T>> {
    comm: M,
    num_qubits: N,
    local_qubits: N,
    pages: PageTable<T>,
    perm: Permutation,
    xchg: Vec<C<T>>,
    scratch: Vec<C<T>>,
}

/// Bit position split of one operated qubit, relative to the page layout.
#[derive(Clone, Copy)]
enum SlotBit {
    Unit(Mask),
    Page(Mask),
}

impl<T: Real, M: Communicator<T>> ClusterState<T, M> {
    /// `num_page_qubits` of the `l` local qubits select pages; the rest
    /// index inside a page. The communicator size must be a power of two.
    pub fn new(num_qubits: N, num_page_qubits: N, comm: M) -> Self {
        let perm = Permutation::identity(num_qubits);
        Self::with_permutation(num_qubits, num_page_qubits, comm, perm)
    }

    /// Start from a caller-supplied logical→physical assignment.
    pub fn with_permutation(
        num_qubits: N,
        num_page_qubits: N,
        comm: M,
        perm: Permutation,
    ) -> Self {
        let size = comm.size();
        assert!(size.is_power_of_two(), "process count must be a power of two");
        let global_qubits = size.trailing_zeros() as N;
        assert!(global_qubits < num_qubits, "fewer amplitudes than processes");
        let local_qubits = num_qubits - global_qubits;
        assert!(num_page_qubits <= local_qubits);
        assert!(
            size == 1 || num_page_qubits >= 1,
            "interchange needs at least one page qubit"
        );
        assert_eq!(perm.num_qubits(), num_qubits);

        let mut state = Self {
            comm,
            num_qubits,
            local_qubits,
            pages: PageTable::new(num_page_qubits, local_qubits - num_page_qubits),
            perm,
            xchg: Vec::new(),
            scratch: Vec::new(),
        };
        state.reset(0);
        state
    }

    pub fn rank(&self) -> N {
        self.comm.rank()
    }

    pub fn permutation(&self) -> &Permutation {
        &self.perm
    }

    #[inline]
    fn unit_qubits(&self) -> N {
        self.pages.unit_qubits()
    }

    #[inline]
    fn rank_bit(&self, position: N) -> bool {
        (self.comm.rank() >> (position - self.local_qubits)) & 1 == 1
    }

    /// Interchange qubits between processes until every qubit in `moved`
    /// resolves to a local physical position. Residents of `pinned`
    /// qubits are never chosen as local swap targets.
    fn ensure_local(&mut self, moved: &[N], pinned: &[N]) {
        loop {
            let globals: Vec<N> = moved
                .iter()
                .copied()
                .filter(|&q| self.perm.physical(q) >= self.local_qubits)
                .collect();
            if globals.is_empty() {
                return;
            }
            let batch = globals.len().min(self.pages.num_pages().trailing_zeros() as N);
            self.interchange(&globals[..batch], pinned);
        }
    }

    /// Move `globals` (logical qubits at global positions) to the top
    /// local positions by exchanging half-segments with the `2^k - 1`
    /// XOR partner processes. Qubits in `pinned` are never chosen as
    /// swap targets.
    fn interchange(&mut self, globals: &[N], pinned: &[N]) {
        let k = globals.len();
        let l = self.local_qubits;
        let g = self.unit_qubits();
        debug_assert!(k >= 1 && k <= l - g);
        log::debug!("interchange of {} global qubit(s)", k);

        // Claim the top k local positions, evicting pinned residents.
        let mut local_swap_qubits = Vec::with_capacity(k);
        for i in 0..k {
            let pos = l - 1 - i;
            if pinned.contains(&self.perm.logical_at(pos)) {
                let free = (0..l - k)
                    .rev()
                    .find(|&p| !pinned.contains(&self.perm.logical_at(p)))
                    .expect("no local position left to host the interchanged qubit");
                self.swap_local_positions(pos, free);
            }
            local_swap_qubits.push(self.perm.logical_at(pos));
        }

        let gpos: Vec<N> = globals.iter().map(|&q| self.perm.physical(q)).collect();
        let rank = self.comm.rank();
        let pages_per_segment = 1usize << (l - k - g);

        for m in 1..(1usize << k) {
            let rank_mask = (0..k)
                .filter(|&i| m & (1 << i) != 0)
                .fold(0, |mask, i| mask | (1 << (gpos[i] - l)));
            let partner = rank ^ rank_mask;

            // The half-segment to hand over carries the partner's global
            // bit values at the local swap positions.
            let mut first = 0;
            for i in 0..k {
                if (partner >> (gpos[i] - l)) & 1 != 0 {
                    first |= 1 << (l - 1 - i);
                }
            }
            let first_page = first >> g;
            self.xchg.resize(self.pages.page_len(), c_zero());
            for p in first_page..first_page + pages_per_segment {
                self.comm.sendrecv(partner, self.pages.page(p), &mut self.xchg);
                self.pages.page_mut(p).copy_from_slice(&self.xchg);
            }
        }

        for (i, &q) in globals.iter().enumerate() {
            self.perm.swap_logical(q, local_swap_qubits[i]);
        }
    }

    /// Physically exchange two local bit positions and patch the
    /// permutation. Page-to-page swaps only permute page handles.
    fn swap_local_positions(&mut self, p1: N, p2: N) {
        debug_assert!(p1 != p2 && p1 < self.local_qubits && p2 < self.local_qubits);
        let g = self.unit_qubits();

        if p1 >= g && p2 >= g {
            let (b1, b2) = (1 << (p1 - g), 1 << (p2 - g));
            for pi in 0..self.pages.num_pages() {
                if pi & b1 != 0 && pi & b2 == 0 {
                    self.pages.swap_pages(pi, pi ^ (b1 | b2));
                }
            }
        } else if p1 < g && p2 < g {
            self.pages.for_each_page(|_, page| {
                crate::operator::kernel::swap2(page, p1, p2, Ctrl::NONE);
            });
        } else {
            let (unit, page) = if p1 < g { (p1, p2) } else { (p2, p1) };
            let (ub, pb) = (1 << unit, 1 << (page - g));
            for pi in 0..self.pages.num_pages() {
                if pi & pb != 0 {
                    continue;
                }
                let (lo, hi) = self.pages.two_pages_mut(pi, pi | pb);
                for i in 0..lo.len() {
                    if i & ub != 0 {
                        std::mem::swap(&mut lo[i], &mut hi[i ^ ub]);
                    }
                }
            }
        }

        let (a, b) = (self.perm.logical_at(p1), self.perm.logical_at(p2));
        self.perm.swap_logical(a, b);
    }

    /// Diagonal gates multiply local amplitudes in place; global target
    /// bits contribute a fixed factor and global controls gate whole
    /// processes in O(1).
    fn apply_diagonal(&mut self, gate: &Gate<T>) {
        let l = self.local_qubits;
        let g = self.unit_qubits();

        let mut local_tmask = 0;
        let mut global_ones = 0;
        for &q in gate.targets() {
            let pos = self.perm.physical(q);
            if pos >= l {
                if self.rank_bit(pos) {
                    global_ones += 1;
                }
            } else {
                local_tmask |= 1 << pos;
            }
        }

        let mut local_ctrl = Vec::new();
        for c in gate.controls() {
            let pos = self.perm.physical(c.qubit);
            if pos >= l {
                if self.rank_bit(pos) != c.value {
                    return;
                }
            } else {
                local_ctrl.push((pos, c.value));
            }
        }
        let ctrl = Ctrl::new(&local_ctrl);

        let table =
            crate::operator::kernel::diag_table(gate.kind(), count_bits(local_tmask), global_ones);
        self.pages.for_each_page(|pi, page| {
            let base = pi << g;
            for (i, amp) in page.iter_mut().enumerate() {
                let idx = base | i;
                if idx & ctrl.mask == ctrl.value {
                    *amp *= table[count_bits(idx & local_tmask)];
                }
            }
        });
    }

    /// SWAP with at least one target at a global position: the exchange
    /// of interchange without its permutation patch, so the data move
    /// itself realises the gate.
    fn swap_with_global(&mut self, lo_pos: N, hi_pos: N) {
        let l = self.local_qubits;
        let g = self.unit_qubits();
        debug_assert!(hi_pos >= l);
        let rank = self.comm.rank();
        self.xchg.resize(self.pages.page_len(), c_zero());

        if lo_pos >= l {
            // Both global: ranks whose two bits differ trade their whole
            // segments.
            let (ba, bb) = (1 << (lo_pos - l), 1 << (hi_pos - l));
            if (rank & ba != 0) == (rank & bb != 0) {
                return;
            }
            let partner = rank ^ ba ^ bb;
            for p in 0..self.pages.num_pages() {
                self.comm.sendrecv(partner, self.pages.page(p), &mut self.xchg);
                self.pages.page_mut(p).copy_from_slice(&self.xchg);
            }
            return;
        }

        // Bring the local side to a page position so the exchanged
        // half-segment is a set of whole pages.
        let mut lp = lo_pos;
        if lp < g {
            self.swap_local_positions(lp, l - 1);
            lp = l - 1;
        }
        let partner = rank ^ (1 << (hi_pos - l));
        let send_bit = (partner >> (hi_pos - l)) & 1;
        let page_bit = 1 << (lp - g);
        for p in 0..self.pages.num_pages() {
            if (p & page_bit != 0) as Mask != send_bit {
                continue;
            }
            self.comm.sendrecv(partner, self.pages.page(p), &mut self.xchg);
            self.pages.page_mut(p).copy_from_slice(&self.xchg);
        }
    }

    /// Apply a non-diagonal gate whose targets are all local. Controls
    /// still sitting at global positions mask the whole process.
    fn apply_local(&mut self, gate: &Gate<T>) {
        let l = self.local_qubits;
        let g = self.unit_qubits();

        let tpos: Vec<N> = gate.targets().iter().map(|&q| self.perm.physical(q)).collect();
        let mut ctrls: Vec<(N, bool)> = Vec::with_capacity(gate.controls().len());
        for c in gate.controls() {
            let pos = self.perm.physical(c.qubit);
            if pos >= l {
                if self.rank_bit(pos) != c.value {
                    return;
                }
            } else {
                ctrls.push((pos, c.value));
            }
        }
        debug_assert!(tpos.iter().all(|&p| p < l));

        // Page shortcuts: X re-tags pages, page-to-page SWAP permutes
        // handles; neither touches amplitude data.
        if ctrls.is_empty() {
            match gate.kind() {
                Kind::X if tpos.iter().all(|&p| p >= g) => {
                    let flip = tpos.iter().fold(0, |m, &p| m | (1 << (p - g)));
                    for pi in 0..self.pages.num_pages() {
                        if pi < pi ^ flip {
                            self.pages.swap_pages(pi, pi ^ flip);
                        }
                    }
                    return;
                }
                Kind::Swap if tpos.iter().all(|&p| p >= g) => {
                    let (b1, b2) = (1 << (tpos[0] - g), 1 << (tpos[1] - g));
                    for pi in 0..self.pages.num_pages() {
                        if pi & b1 != 0 && pi & b2 == 0 {
                            self.pages.swap_pages(pi, pi ^ (b1 | b2));
                        }
                    }
                    return;
                }
                _ => {}
            }
        }

        if tpos.iter().all(|&p| p < g) {
            // Unit-only targets stream page by page.
            let unit_ctrl: Vec<(N, bool)> =
                ctrls.iter().copied().filter(|&(p, _)| p < g).collect();
            let (pmask, pval) = ctrls
                .iter()
                .filter(|&&(p, _)| p >= g)
                .fold((0, 0), |(m, v), &(p, value)| {
                    (m | (1 << (p - g)), v | ((value as Mask) << (p - g)))
                });
            let ctrl = Ctrl::new(&unit_ctrl);
            let kind = *gate.kind();
            let targets = tpos;
            self.pages.for_each_page(|pi, page| {
                if pi & pmask == pval {
                    apply_flat(page, &kind, &targets, ctrl);
                }
            });
            return;
        }

        // Page-crossing targets go through the gather/scatter block path.
        let kind = *gate.kind();
        let slots: Vec<N> = (0..tpos.len()).collect();
        self.for_each_block(&tpos, &ctrls, |scratch| {
            apply_flat(scratch, &kind, &slots, Ctrl::NONE);
        });
    }

    /// Gather every `2^positions.len()`-amplitude block selected by the
    /// non-operated free bits (controls pinned to their values), run `f`
    /// on it, and scatter it back.
    fn for_each_block<F>(&mut self, positions: &[N], fixed: &[(N, bool)], f: F)
    where
        F: Fn(&mut [C<T>]),
    {
        let g = self.unit_qubits();
        let page_width = self.local_qubits - g;

        let mut unit_ops = Vec::new();
        let mut page_ops = Vec::new();
        for &pos in positions.iter().chain(fixed.iter().map(|(p, _)| p)) {
            if pos < g {
                unit_ops.push(pos);
            } else {
                page_ops.push(pos - g);
            }
        }
        let unit_masks = IndexMasks::new(g, &unit_ops);
        let page_masks = IndexMasks::new(page_width, &page_ops);

        let (mut unit_fixed, mut page_fixed) = (0, 0);
        for &(pos, value) in fixed {
            if value {
                if pos < g {
                    unit_fixed |= 1 << pos;
                } else {
                    page_fixed |= 1 << (pos - g);
                }
            }
        }

        let slots: Vec<SlotBit> = positions
            .iter()
            .map(|&pos| {
                if pos < g {
                    SlotBit::Unit(1 << pos)
                } else {
                    SlotBit::Page(1 << (pos - g))
                }
            })
            .collect();
        let block = 1usize << positions.len();
        // Page and unit offsets of every in-block pattern.
        let offsets: Vec<(Mask, Mask)> = (0..block)
            .map(|p| {
                slots.iter().enumerate().fold((0, 0), |(pi, ui), (t, slot)| {
                    if p & (1 << t) == 0 {
                        (pi, ui)
                    } else {
                        match slot {
                            SlotBit::Unit(b) => (pi, ui | b),
                            SlotBit::Page(b) => (pi | b, ui),
                        }
                    }
                })
            })
            .collect();

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.resize(block, c_zero());

        for pf in 0..page_masks.free_count() {
            let pbase = page_masks.expand(pf) | page_fixed;
            for uf in 0..unit_masks.free_count() {
                let ubase = unit_masks.expand(uf) | unit_fixed;
                for (p, &(po, uo)) in offsets.iter().enumerate() {
                    scratch[p] = self.pages.page(pbase | po)[ubase | uo];
                }
                f(&mut scratch);
                for (p, &(po, uo)) in offsets.iter().enumerate() {
                    self.pages.page_mut(pbase | po)[ubase | uo] = scratch[p];
                }
            }
        }

        self.scratch = scratch;
    }

    /// Per-rank mass vector and its exclusive prefix for this rank; the
    /// walk order matches `PageTable::norm_sqr` so interval boundaries
    /// agree bit-exactly across ranks.
    fn mass_offsets(&mut self) -> (Vec<T>, T, T) {
        let size = self.comm.size();
        let mut masses = vec![T::zero(); size];
        masses[self.comm.rank()] = self.pages.norm_sqr();
        self.comm.allreduce_sum(&mut masses);

        let offset: T = masses[..self.comm.rank()].iter().copied().sum();
        let total: T = masses.iter().copied().sum();
        (masses, offset, total)
    }

    fn logical_of_local(&self, local_idx: Mask) -> Mask {
        let physical = (self.comm.rank() << self.local_qubits) | local_idx;
        self.perm.logical_index(physical)
    }
}

impl<T: Real, M: Communicator<T>> StateVector<T> for ClusterState<T, M> {
    fn num_qubits(&self) -> N {
        self.num_qubits
    }

    fn reset(&mut self, basis: Mask) {
        let physical = self.perm.physical_index(basis);
        let owner = physical >> self.local_qubits;
        let local = physical & low_ones(self.local_qubits);
        self.pages.reset_to((owner == self.comm.rank()).then(|| local));
    }

    fn apply(&mut self, gate: &Gate<T>) -> Result {
        if gate.kind().is_diagonal() {
            self.apply_diagonal(gate);
            return Ok(());
        }

        if matches!(gate.kind(), Kind::Swap) && gate.controls().is_empty() {
            let (pa, pb) = (
                self.perm.physical(gate.targets()[0]),
                self.perm.physical(gate.targets()[1]),
            );
            if pa >= self.local_qubits || pb >= self.local_qubits {
                self.swap_with_global(pa.min(pb), pa.max(pb));
                return Ok(());
            }
        }

        // Only targets are interchanged; a control left at a global
        // position gates this whole process in or out below.
        self.ensure_local(gate.targets(), gate.targets());
        self.apply_local(gate);
        Ok(())
    }

    fn apply_fused(&mut self, qubits: &[N], gates: &[Gate<T>]) -> Result {
        log::debug!("fused replay of {} gate(s) over {} qubit(s)", gates.len(), qubits.len());
        self.ensure_local(qubits, qubits);
        let positions: Vec<N> = qubits.iter().map(|&q| self.perm.physical(q)).collect();

        let prepared: Vec<(&Gate<T>, Ctrl)> = gates
            .iter()
            .map(|gate| {
                let bits: Vec<(N, bool)> =
                    gate.controls().iter().map(|c| (c.qubit, c.value)).collect();
                (gate, Ctrl::new(&bits))
            })
            .collect();

        self.for_each_block(&positions, &[], |scratch| {
            for (gate, ctrl) in &prepared {
                apply_flat(scratch, gate.kind(), gate.targets(), *ctrl);
            }
        });
        Ok(())
    }

    fn prob_one(&mut self, qubit: N) -> T {
        let l = self.local_qubits;
        let g = self.unit_qubits();
        let pos = self.perm.physical(qubit);

        let local = if pos >= l {
            if self.rank_bit(pos) {
                self.pages.norm_sqr()
            } else {
                T::zero()
            }
        } else if pos >= g {
            let bit = 1 << (pos - g);
            (0..self.pages.num_pages())
                .filter(|pi| pi & bit != 0)
                .map(|pi| self.pages.page(pi).iter().map(|amp| amp.norm_sqr()).sum::<T>())
                .sum()
        } else {
            let bit = 1 << pos;
            (0..self.pages.num_pages())
                .map(|pi| {
                    self.pages
                        .page(pi)
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| i & bit != 0)
                        .map(|(_, amp)| amp.norm_sqr())
                        .sum::<T>()
                })
                .sum()
        };

        let mut buf = [local];
        self.comm.allreduce_sum(&mut buf);
        buf[0]
    }

    fn collapse(&mut self, qubit: N, outcome: bool, prob: T) {
        // Rounding can drive the survivor mass slightly negative when the
        // discarded branch held everything.
        if prob <= T::zero() || approx_zero(prob.to_f64()) {
            self.reset(0);
            return;
        }
        let l = self.local_qubits;
        let g = self.unit_qubits();
        let pos = self.perm.physical(qubit);
        let scale = renorm_scale(prob);

        if pos >= l {
            if self.rank_bit(pos) != outcome {
                self.pages.fill_zero();
            } else {
                self.pages.scale(scale);
            }
        } else if pos >= g {
            let bit = 1 << (pos - g);
            self.pages.for_each_page(|pi, page| {
                let keep = (pi & bit != 0) == outcome;
                for amp in page.iter_mut() {
                    *amp = if keep { amp.scale(scale) } else { c_zero() };
                }
            });
        } else {
            let bit = 1 << pos;
            let keep = if outcome { bit } else { 0 };
            self.pages.for_each_page(|_, page| {
                for (i, amp) in page.iter_mut().enumerate() {
                    *amp = if i & bit == keep {
                        amp.scale(scale)
                    } else {
                        c_zero()
                    };
                }
            });
        }
    }

    fn measure_all(&mut self, u: f64) -> Mask {
        let (masses, _, total) = self.mass_offsets();
        let target = T::from_f64(u) * total;

        // Same deterministic walk on every rank selects the owner.
        let mut owner = 0;
        let mut owner_offset = T::zero();
        let mut acc = T::zero();
        for (r, &mass) in masses.iter().enumerate() {
            if mass > T::zero() {
                owner = r;
                owner_offset = acc;
                if target < acc + mass {
                    break;
                }
            }
            acc += mass;
        }

        let mut local_choice = None;
        let mut chosen = [0u64];
        if self.comm.rank() == owner {
            // Two-level accumulation in the same nesting as `norm_sqr`,
            // so the walk ends exactly at the advertised rank mass.
            let mut pages_acc = T::zero();
            let mut last_occupied = 0;
            'walk: for pi in 0..self.pages.num_pages() {
                let mut page_acc = T::zero();
                for i in 0..self.pages.page_len() {
                    let li = (pi << self.unit_qubits()) | i;
                    let p = self.pages.get(li).norm_sqr();
                    page_acc += p;
                    if p > T::zero() {
                        last_occupied = li;
                        if target < (owner_offset + pages_acc) + page_acc {
                            break 'walk;
                        }
                    }
                }
                pages_acc += page_acc;
            }
            local_choice = Some(last_occupied);
            chosen[0] = self.logical_of_local(last_occupied) as u64;
        }
        self.comm.broadcast_indices(&mut chosen, owner);

        self.pages.reset_to(local_choice);
        chosen[0] as Mask
    }

    fn sample_events(&mut self, variates: &[f64]) -> Vec<Mask> {
        let (masses, offset, total) = self.mass_offsets();
        let mut events = vec![0u64; variates.len()];

        let tail_owner = (0..masses.len())
            .rev()
            .find(|&r| masses[r] > T::zero())
            .unwrap_or(0);

        let targets: Vec<T> = variates.iter().map(|&u| T::from_f64(u) * total).collect();
        let mut vi = 0;
        while vi < targets.len() && targets[vi] < offset {
            vi += 1;
        }

        // This rank owns the variates in [offset, end): `end` is the same
        // single addition the next rank performs for its own offset, so
        // every variate has exactly one owner no matter how the local
        // cumulative sums round.
        let end = offset + masses[self.comm.rank()];
        let mut pages_acc = T::zero();
        let mut last_occupied = None;
        for pi in 0..self.pages.num_pages() {
            let mut page_acc = T::zero();
            for i in 0..self.pages.page_len() {
                let li = (pi << self.unit_qubits()) | i;
                let p = self.pages.get(li).norm_sqr();
                page_acc += p;
                if p > T::zero() {
                    last_occupied = Some(li);
                }
                let threshold = ((offset + pages_acc) + page_acc).min(end);
                while vi < targets.len() && targets[vi] < threshold {
                    events[vi] = self.logical_of_local(li) as u64;
                    vi += 1;
                }
            }
            pages_acc += page_acc;
        }
        // Rounding slivers at the top of the local cumulative fall on the
        // last occupied state.
        if let Some(li) = last_occupied {
            let logical = self.logical_of_local(li) as u64;
            while vi < targets.len() && targets[vi] < end {
                events[vi] = logical;
                vi += 1;
            }
        }
        // Rounding can push the last variates past every interval; the
        // last occupied state of the last non-empty rank absorbs them.
        if self.comm.rank() == tail_owner {
            if let Some(li) = last_occupied {
                let logical = self.logical_of_local(li) as u64;
                for event in events.iter_mut().skip(vi) {
                    *event = logical;
                }
            }
        }

        self.comm.allreduce_sum_indices(&mut events);
        events.into_iter().map(|e| e as Mask).collect()
    }

    fn spin_expectations(&mut self) -> Vec<[T; 3]> {
        let two = T::from_f64(2.0);
        (0..self.num_qubits)
            .map(|q| {
                self.ensure_local(&[q], &[q]);
                let g = self.unit_qubits();
                let pos = self.perm.physical(q);

                let mut pair_sum = c_zero();
                let mut s1 = T::zero();
                if pos < g {
                    let bit = 1 << pos;
                    for pi in 0..self.pages.num_pages() {
                        let page = self.pages.page(pi);
                        for (i, amp) in page.iter().enumerate() {
                            if i & bit == 0 {
                                pair_sum += amp.conj() * page[i | bit];
                            } else {
                                s1 += amp.norm_sqr();
                            }
                        }
                    }
                } else {
                    let bit = 1 << (pos - g);
                    for pi in 0..self.pages.num_pages() {
                        if pi & bit != 0 {
                            s1 += self.pages.page(pi).iter().map(|amp| amp.norm_sqr()).sum();
                            continue;
                        }
                        let upper = self.pages.page(pi | bit);
                        for (amp, up) in self.pages.page(pi).iter().zip(upper.iter()) {
                            pair_sum += amp.conj() * up;
                        }
                    }
                }

                let mut buf = [pair_sum.re, pair_sum.im, s1];
                self.comm.allreduce_sum(&mut buf);
                [two * buf[0], two * buf[1], T::one() - two * buf[2]]
            })
            .collect()
    }

    fn prepare_shor_box(&mut self, num_exponent_qubits: N, divisor: Mask, base: Mask) {
        self.pages.fill_zero();
        let l = self.local_qubits;
        let count = 1usize << num_exponent_qubits;
        let amp = c_one::<T>().scale(T::from_f64(count as f64).sqrt().recip());
        for x in 0..count {
            let logical = (mod_pow(base, x, divisor) << num_exponent_qubits) | x;
            let physical = self.perm.physical_index(logical);
            if physical >> l == self.comm.rank() {
                self.pages.set(physical & low_ones(l), amp);
            }
        }
    }

    fn shared_uniform(&mut self, rng: &mut StdRng) -> f64 {
        let mut bits = [if self.comm.rank() == 0 {
            rng.gen::<f64>().to_bits()
        } else {
            0
        }];
        self.comm.broadcast_indices(&mut bits, 0);
        f64::from_bits(bits[0])
    }

    fn shared_uniforms(&mut self, rng: &mut StdRng, count: N) -> Vec<f64> {
        let mut bits = if self.comm.rank() == 0 {
            (0..count).map(|_| rng.gen::<f64>().to_bits()).collect()
        } else {
            vec![0; count]
        };
        self.comm.broadcast_indices(&mut bits, 0);
        bits.into_iter().map(f64::from_bits).collect()
    }

    fn collect(&mut self) -> Vec<C<T>> {
        let mut buf = vec![T::zero(); 1 << (self.num_qubits + 1)];
        for li in 0..self.pages.local_len() {
            let amp = self.pages.get(li);
            let logical = self.logical_of_local(li);
            buf[2 * logical] = amp.re;
            buf[2 * logical + 1] = amp.im;
        }
        self.comm.allreduce_sum(&mut buf);
        (0..1usize << self.num_qubits)
            .map(|idx| C::new(buf[2 * idx], buf[2 * idx + 1]))
            .collect()
    }

    fn norm_sqr(&mut self) -> T {
        let mut buf = [self.pages.norm_sqr()];
        self.comm.allreduce_sum(&mut buf);
        buf[0]
    }

    fn check(&self) -> Result {
        self.perm.verify()
    }

    fn num_page_qubits(&self) -> N {
        self.pages.num_pages().trailing_zeros() as N
    }

    fn num_pages(&self) -> N {
        self.pages.num_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SoloComm;
    use crate::operator as op;

    fn solo(num_qubits: N, num_page_qubits: N) -> ClusterState<f64, SoloComm> {
        ClusterState::new(num_qubits, num_page_qubits, SoloComm)
    }

    fn assert_close(a: &[C<f64>], b: &[C<f64>]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < 1e-12, "{:?} != {:?}", a, b);
        }
    }

    /// Every gate must act identically on the paged and the flat layout.
    fn paged_matches_flat(gates: &[Gate<f64>]) {
        for page_qubits in 0..=3 {
            let mut paged = solo(4, page_qubits);
            let mut flat = crate::backend::LocalState::<f64>::new(4);
            for gate in gates {
                paged.apply(gate).unwrap();
                flat.apply(gate).unwrap();
            }
            assert_close(&paged.collect(), &flat.collect());
        }
    }

    #[test]
    fn unit_gates_match_flat() {
        paged_matches_flat(&[op::h(0), op::cnot(1, 0), op::u3(0.3, 1.1, -0.4, 1)]);
    }

    #[test]
    fn page_qubit_gates_match_flat() {
        paged_matches_flat(&[op::h(3), op::h(2), op::cnot(3, 0), op::swap(2, 3)]);
    }

    #[test]
    fn diagonal_gates_match_flat() {
        paged_matches_flat(&[
            op::h(0),
            op::h(3),
            op::cz(3, 0),
            op::u1(0.7, 3),
            op::exp_zn(0.4, &[0, 3]),
            op::sqrt_zn(&[1, 2]).controlled(3),
        ]);
    }

    #[test]
    fn string_gates_match_flat() {
        paged_matches_flat(&[
            op::h(1),
            op::xn(&[0, 3]),
            op::yn(&[1, 2]),
            op::exp_xn(0.9, &[0, 2]),
            op::exp_swap(0.35, 1, 3),
        ]);
    }

    #[test]
    fn fused_replay_matches_flat() {
        let mut paged = solo(4, 2);
        let mut flat = crate::backend::LocalState::<f64>::new(4);
        let preload = op::h::<f64>(3);
        paged.apply(&preload).unwrap();
        flat.apply(&preload).unwrap();

        // Slot space over qubits [0, 1, 3].
        let gates = vec![op::h(0), op::cnot(1, 0), op::cnot(2, 1)];
        paged.apply_fused(&[0, 1, 3], &gates).unwrap();

        flat.apply(&op::h(0)).unwrap();
        flat.apply(&op::cnot(1, 0)).unwrap();
        flat.apply(&op::cnot(3, 1)).unwrap();

        assert_close(&paged.collect(), &flat.collect());
    }

    #[test]
    fn measurement_collapses_paged_state() {
        let mut state = solo(3, 1);
        state.apply(&op::h(2)).unwrap();
        let p1 = state.prob_one(2);
        assert!((p1 - 0.5).abs() < 1e-12);

        state.collapse(2, true, p1);
        let psi = state.collect();
        assert!((psi[0b100].re - 1.0).abs() < 1e-12);
        assert!((state.norm_sqr() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn shor_box_matches_local() {
        let mut paged = solo(4, 2);
        let mut flat = crate::backend::LocalState::<f64>::new(4);
        paged.prepare_shor_box(2, 3, 2);
        flat.prepare_shor_box(2, 3, 2);
        assert_close(&paged.collect(), &flat.collect());
    }
}
