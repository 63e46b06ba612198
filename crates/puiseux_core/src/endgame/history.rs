//! Sliding window of `(time, sample)` pairs, kept at both precisions.
//!
//! Only one window is live at a time; `PrecisionMode` says which. Algorithms
//! are generic over the scalar type and reach the matching window through
//! `HistoryScalar`.

use nalgebra::DVector;
use num_complex::Complex64;
use std::collections::VecDeque;

use super::{EndgameError, Point, PrecisionMode};
use crate::traits::{ComplexScalar, FIXED_DIGITS};

/// Fixed-capacity FIFO of times and samples, oldest first.
#[derive(Debug, Clone)]
pub struct Window<T> {
    times: VecDeque<T>,
    samples: VecDeque<DVector<T>>,
    capacity: usize,
}

impl<T: ComplexScalar> PartialEq for Window<T> {
    fn eq(&self, other: &Self) -> bool {
        self.capacity == other.capacity && self.times == other.times && self.samples == other.samples
    }
}

impl<T: ComplexScalar> Window<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            times: VecDeque::with_capacity(capacity + 1),
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn clear(&mut self) {
        self.times.clear();
        self.samples.clear();
    }

    /// Number of complete `(time, sample)` pairs.
    pub fn len(&self) -> usize {
        self.times.len().min(self.samples.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict();
    }

    pub fn times(&self) -> VecDeque<T> {
        self.times.clone()
    }

    pub fn samples(&self) -> VecDeque<DVector<T>> {
        self.samples.clone()
    }

    pub fn times_ref(&self) -> &VecDeque<T> {
        &self.times
    }

    pub fn samples_ref(&self) -> &VecDeque<DVector<T>> {
        &self.samples
    }

    pub(crate) fn samples_mut(&mut self) -> &mut VecDeque<DVector<T>> {
        &mut self.samples
    }

    /// Replaces the times wholesale. Counts are only checked when an
    /// algorithm reads the window.
    pub fn set_times(&mut self, times: VecDeque<T>) {
        self.times = times;
    }

    pub fn set_samples(&mut self, samples: VecDeque<DVector<T>>) {
        self.samples = samples;
    }

    /// Appends at the tail and drops from the head once over capacity.
    pub fn push(&mut self, time: T, sample: DVector<T>) {
        self.times.push_back(time);
        self.samples.push_back(sample);
        self.evict();
    }

    fn evict(&mut self) {
        while self.times.len() > self.capacity {
            self.times.pop_front();
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn check_consistent(&self) -> Result<(), EndgameError> {
        if self.times.len() != self.samples.len() {
            return Err(EndgameError::MismatchedHistory {
                times: self.times.len(),
                samples: self.samples.len(),
            });
        }
        Ok(())
    }

    pub fn newest(&self) -> Option<(&T, &DVector<T>)> {
        Some((self.times.back()?, self.samples.back()?))
    }

    /// Largest precision held by any time or sample component.
    pub fn max_digits(&self) -> Option<u32> {
        self.times
            .iter()
            .chain(self.samples.iter().flat_map(|s| s.iter()))
            .map(|v| v.digits())
            .max()
    }

    fn set_digits(&mut self, digits: u32) {
        for t in self.times.iter_mut() {
            t.set_digits(digits);
        }
        for sample in self.samples.iter_mut() {
            for v in sample.iter_mut() {
                v.set_digits(digits);
            }
        }
    }

    fn map_into<U: ComplexScalar>(&self, convert: impl Fn(&T) -> U) -> Window<U> {
        Window {
            times: self.times.iter().map(&convert).collect(),
            samples: self
                .samples
                .iter()
                .map(|s| DVector::from_iterator(s.len(), s.iter().map(&convert)))
                .collect(),
            capacity: self.capacity,
        }
    }
}

/// The two windows plus the tag recording which one is live.
#[derive(Debug, Clone)]
pub struct History {
    fixed: Window<Complex64>,
    multiple: Window<rug::Complex>,
    mode: PrecisionMode,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            fixed: Window::new(capacity),
            multiple: Window::new(capacity),
            mode: PrecisionMode::Fixed,
        }
    }

    pub fn mode(&self) -> PrecisionMode {
        self.mode
    }

    /// Records the live precision without touching stored values.
    pub(crate) fn set_mode(&mut self, mode: PrecisionMode) {
        self.mode = mode;
    }

    pub fn window<T: HistoryScalar>(&self) -> &Window<T> {
        T::window(self)
    }

    pub fn window_mut<T: HistoryScalar>(&mut self) -> &mut Window<T> {
        T::window_mut(self)
    }

    pub fn clear<T: HistoryScalar>(&mut self) {
        T::window_mut(self).clear();
    }

    pub fn set_times<T: HistoryScalar>(&mut self, times: VecDeque<T>) {
        T::window_mut(self).set_times(times);
    }

    pub fn set_samples<T: HistoryScalar>(&mut self, samples: VecDeque<DVector<T>>) {
        T::window_mut(self).set_samples(samples);
    }

    pub fn times<T: HistoryScalar>(&self) -> VecDeque<T> {
        T::window(self).times()
    }

    pub fn samples<T: HistoryScalar>(&self) -> VecDeque<DVector<T>> {
        T::window(self).samples()
    }

    pub fn push<T: HistoryScalar>(&mut self, time: T, sample: DVector<T>) {
        T::window_mut(self).push(time, sample);
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.fixed.set_capacity(capacity);
        self.multiple.set_capacity(capacity);
    }

    /// Converts the live window into `new_mode` and makes it live.
    ///
    /// Widening is exact, narrowing rounds, and a change between two
    /// arbitrary precisions resets the precision of each stored value in
    /// place. The window that stops being live is left as it was.
    pub fn change_precision(&mut self, new_mode: PrecisionMode) {
        match (self.mode, new_mode) {
            (PrecisionMode::Fixed, PrecisionMode::Fixed) => {}
            (PrecisionMode::Fixed, PrecisionMode::Multiple(digits)) => {
                self.multiple = self
                    .fixed
                    .map_into(|&v| <rug::Complex as ComplexScalar>::from_c64(v, digits));
            }
            (PrecisionMode::Multiple(_), PrecisionMode::Fixed) => {
                self.fixed = self.multiple.map_into(|v| v.to_c64());
            }
            (PrecisionMode::Multiple(old), PrecisionMode::Multiple(digits)) => {
                if old != digits {
                    self.multiple.set_digits(digits);
                }
            }
        }
        self.mode = new_mode;
    }

    /// Raises every entry of the `T` window to the largest precision present
    /// and returns that precision.
    pub fn ensure_uniform_precision<T: HistoryScalar>(&mut self) -> u32 {
        let window = T::window_mut(self);
        let digits = window.max_digits().unwrap_or(FIXED_DIGITS);
        window.set_digits(digits);
        digits
    }
}

/// Routes a scalar type to its window in `History` and to its `Point` variant.
pub trait HistoryScalar: ComplexScalar + Sized {
    fn window(history: &History) -> &Window<Self>;

    fn window_mut(history: &mut History) -> &mut Window<Self>;

    /// The precision mode of a value of this type carrying `digits` digits.
    fn mode(digits: u32) -> PrecisionMode;

    fn into_point(point: DVector<Self>) -> Point;
}

impl HistoryScalar for Complex64 {
    fn window(history: &History) -> &Window<Self> {
        &history.fixed
    }

    fn window_mut(history: &mut History) -> &mut Window<Self> {
        &mut history.fixed
    }

    fn mode(_digits: u32) -> PrecisionMode {
        PrecisionMode::Fixed
    }

    fn into_point(point: DVector<Self>) -> Point {
        Point::Fixed(point)
    }
}

impl HistoryScalar for rug::Complex {
    fn window(history: &History) -> &Window<Self> {
        &history.multiple
    }

    fn window_mut(history: &mut History) -> &mut Window<Self> {
        &mut history.multiple
    }

    fn mode(digits: u32) -> PrecisionMode {
        PrecisionMode::Multiple(digits)
    }

    fn into_point(point: DVector<Self>) -> Point {
        Point::Multiple(point)
    }
}
