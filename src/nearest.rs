//! An 8-lane nearest neighbor search over a small set of RGB points.

use std::array;
use wide::{f32x8, u32x8, CmpLt};

/// A set of points packed into structure-of-arrays chunks of eight.
///
/// Unused lanes of the last chunk hold infinity and can never be the nearest point.
#[derive(Debug, Clone)]
pub(crate) struct NearestPoints {
    /// The points as chunks of eight lanes per component.
    chunks: Vec<[f32x8; 3]>,
    /// The number of real points.
    len: usize,
}

impl NearestPoints {
    /// Packs the given points.
    pub fn new(points: &[[f32; 3]]) -> Self {
        let mut chunks = Vec::with_capacity(points.len().div_ceil(8));
        let iter = points.chunks_exact(8);

        chunks.extend(
            iter.clone()
                .map(|chunk| array::from_fn(|c| f32x8::new(array::from_fn(|j| chunk[j][c])))),
        );

        if !iter.remainder().is_empty() {
            let mut arr = [[f32::INFINITY; 8]; 3];
            for (i, point) in iter.remainder().iter().enumerate() {
                for (arr, &c) in arr.iter_mut().zip(point) {
                    arr[i] = c;
                }
            }
            chunks.push(arr.map(f32x8::new));
        }

        Self { chunks, len: points.len() }
    }

    /// The number of points.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the index of the point nearest to `query` by squared euclidean distance,
    /// together with that distance.
    ///
    /// Ties go to the lowest index. Returns `None` if there are no points.
    #[inline]
    pub fn nearest(&self, query: [f32; 3]) -> Option<(usize, f32)> {
        if self.len == 0 {
            return None;
        }

        let incr = u32x8::ONE;
        let mut cur_chunk = u32x8::ZERO;
        let mut min_chunk = cur_chunk;
        let mut min_distance = f32x8::splat(f32::INFINITY);

        let query = query.map(f32x8::splat);

        for chunk in &self.chunks {
            let mut distance = f32x8::ZERO;
            for c in 0..3 {
                let diff = query[c] - chunk[c];
                distance += diff * diff;
            }

            // strictly less, so that earlier chunks keep ties
            let mask = u32x8::new(distance.cmp_lt(min_distance).to_array().map(f32::to_bits));
            min_chunk = mask.blend(cur_chunk, min_chunk);
            min_distance = min_distance.fast_min(distance);
            cur_chunk += incr;
        }

        let chunks = min_chunk.to_array();
        let mut best = None::<(usize, f32)>;
        for (lane, &dist) in min_distance.to_array().iter().enumerate() {
            let index = chunks[lane] as usize * 8 + lane;
            if index >= self.len {
                continue;
            }
            match best {
                Some((i, d)) if d < dist || (d == dist && i < index) => {}
                _ => best = Some((index, dist)),
            }
        }

        best
    }
}
