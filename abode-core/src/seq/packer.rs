//! Index metadata of the packed-sequence layout.
use super::EpisodeIndex;
use crate::AbodeError;
use log::trace;
use ndarray::ArrayView2;
use std::{cmp::Reverse, collections::BTreeMap};

/// Returns the inverse of a permutation of `0..perm.len()`.
pub fn invert_permutation(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inv[p] = i;
    }
    inv
}

/// Packing metadata for one rollout window.
///
/// Sequences (episode segments) are numbered `0..num_sequences()` in descending
/// order of length; every per-sequence vector below uses that numbering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceDescriptor {
    /// Permutation of `0..T*N`. Gathering the flat rows with it gives the
    /// packed data, depth by depth.
    pub select_inds: Vec<usize>,

    /// Number of sequences still active at each depth. Non-increasing.
    pub num_seqs_at_step: Vec<usize>,

    /// Flat row of the first record of each sequence.
    pub sequence_starts: Vec<usize>,

    /// Length of each sequence, descending.
    pub sequence_lengths: Vec<usize>,

    /// Environment id of each sequence.
    pub sequence_environments: Vec<i64>,

    /// Row of the incoming hidden-state batch each sequence draws from,
    /// i.e. the rank of its environment among the distinct environment ids.
    pub rnn_state_batch_inds: Vec<usize>,

    /// `true` for the earliest segment of each environment in the window.
    pub first_sequence_in_batch_mask: Vec<bool>,

    /// `true` for the latest segment of each environment in the window.
    pub last_sequence_in_batch_mask: Vec<bool>,

    /// Indices where `first_sequence_in_batch_mask` is `true`.
    pub first_sequence_in_batch_inds: Vec<usize>,

    /// Indices where `last_sequence_in_batch_mask` is `true`.
    pub last_sequence_in_batch_inds: Vec<usize>,
}

/// A contiguous run of records of one episode in `(episode, step)` order.
struct Segment {
    episode_id: i64,
    environment_id: i64,
    offset: usize,
    len: usize,
}

impl SequenceDescriptor {
    /// Builds the descriptor of a `(T, N)` done matrix.
    ///
    /// See [`EpisodeIndex::from_dones`] for the meaning of the flags.
    pub fn from_dones(dones: ArrayView2<bool>) -> Result<Self, AbodeError> {
        let index = EpisodeIndex::from_dones(dones);
        Self::from_episode_ids(&index.episode_ids, &index.environment_ids, &index.step_ids)
    }

    /// Builds the descriptor from per-record identifiers.
    ///
    /// `episode_ids` must be globally unique across environments and
    /// `step_ids` non-negative. Fails with [`AbodeError::DataIntegrityError`] if
    /// two records share the same `(episode, step)` pair or if one episode id
    /// shows up in two environments.
    pub fn from_episode_ids(
        episode_ids: &[i64],
        environment_ids: &[i64],
        step_ids: &[i64],
    ) -> Result<Self, AbodeError> {
        let len = episode_ids.len();
        if environment_ids.len() != len || step_ids.len() != len {
            return Err(AbodeError::DataIntegrityError(format!(
                "Mismatched lengths: {} episode ids, {} environment ids, {} step ids",
                len,
                environment_ids.len(),
                step_ids.len()
            )));
        }
        if len == 0 {
            return Ok(Self::default());
        }
        if let Some(s) = step_ids.iter().find(|&&s| s < 0) {
            return Err(AbodeError::DataIntegrityError(format!(
                "Negative step id {}",
                s
            )));
        }

        // Sort by (episode, step) so that every episode becomes a contiguous block.
        let stride = step_ids
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| {
                AbodeError::DataIntegrityError("Sort key overflow for the largest step id".to_string())
            })?;
        let keys = episode_ids
            .iter()
            .zip(step_ids.iter())
            .map(|(&e, &s)| {
                e.checked_mul(stride)
                    .and_then(|k| k.checked_add(s))
                    .ok_or_else(|| {
                        AbodeError::DataIntegrityError(format!(
                            "Sort key overflow for episode id {}",
                            e
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut order = (0..len).collect::<Vec<_>>();
        order.sort_unstable_by_key(|&i| keys[i]);

        if let Some(w) = order.windows(2).find(|w| keys[w[0]] == keys[w[1]]) {
            return Err(AbodeError::DataIntegrityError(format!(
                "Records {} and {} share episode id {} and step id {}",
                w[0], w[1], episode_ids[w[0]], step_ids[w[0]]
            )));
        }

        let segments = Self::segments(&order, episode_ids, environment_ids)?;

        // Longest first; the stable sort keeps ascending episode ids on ties.
        let mut by_length = (0..segments.len()).collect::<Vec<_>>();
        by_length.sort_by_key(|&k| Reverse(segments[k].len));
        let segments = by_length
            .into_iter()
            .map(|k| &segments[k])
            .collect::<Vec<_>>();
        let sequence_lengths = segments.iter().map(|s| s.len).collect::<Vec<_>>();

        let max_length = sequence_lengths[0];
        let mut num_seqs_at_step = Vec::with_capacity(max_length);
        let mut active = segments.len();
        for depth in 0..max_length {
            while active > 0 && sequence_lengths[active - 1] <= depth {
                active -= 1;
            }
            num_seqs_at_step.push(active);
        }

        let mut select_inds = Vec::with_capacity(len);
        for (depth, &n_active) in num_seqs_at_step.iter().enumerate() {
            for seg in segments[..n_active].iter() {
                select_inds.push(order[seg.offset + depth]);
            }
        }
        debug_assert_eq!(select_inds.len(), len);

        let sequence_starts = select_inds[..segments.len()].to_vec();
        let sequence_environments = segments
            .iter()
            .map(|s| s.environment_id)
            .collect::<Vec<_>>();

        // Earliest and latest segment of each environment, ordered by the step
        // at which the segment starts.
        let mut env_bounds: BTreeMap<i64, ((i64, i64), (i64, i64))> = BTreeMap::new();
        for (seg, &start) in segments.iter().zip(sequence_starts.iter()) {
            let key = (step_ids[start], seg.episode_id);
            env_bounds
                .entry(seg.environment_id)
                .and_modify(|(first, last)| {
                    *first = (*first).min(key);
                    *last = (*last).max(key);
                })
                .or_insert((key, key));
        }
        let env_rank = env_bounds
            .keys()
            .enumerate()
            .map(|(rank, &env)| (env, rank))
            .collect::<BTreeMap<_, _>>();

        let mut rnn_state_batch_inds = Vec::with_capacity(segments.len());
        let mut first_sequence_in_batch_mask = Vec::with_capacity(segments.len());
        let mut last_sequence_in_batch_mask = Vec::with_capacity(segments.len());
        for (seg, &start) in segments.iter().zip(sequence_starts.iter()) {
            let key = (step_ids[start], seg.episode_id);
            let (first, last) = env_bounds[&seg.environment_id];
            rnn_state_batch_inds.push(env_rank[&seg.environment_id]);
            first_sequence_in_batch_mask.push(key == first);
            last_sequence_in_batch_mask.push(key == last);
        }
        let mask_to_inds = |mask: &[bool]| {
            mask.iter()
                .enumerate()
                .filter_map(|(i, &m)| if m { Some(i) } else { None })
                .collect::<Vec<_>>()
        };
        let first_sequence_in_batch_inds = mask_to_inds(&first_sequence_in_batch_mask);
        let last_sequence_in_batch_inds = mask_to_inds(&last_sequence_in_batch_mask);

        trace!(
            "Packed {} records into {} sequences over {} environments, max length {}",
            len,
            segments.len(),
            env_rank.len(),
            max_length
        );

        Ok(Self {
            select_inds,
            num_seqs_at_step,
            sequence_starts,
            sequence_lengths,
            sequence_environments,
            rnn_state_batch_inds,
            first_sequence_in_batch_mask,
            last_sequence_in_batch_mask,
            first_sequence_in_batch_inds,
            last_sequence_in_batch_inds,
        })
    }

    /// Splits the sorted records into episode segments.
    fn segments(
        order: &[usize],
        episode_ids: &[i64],
        environment_ids: &[i64],
    ) -> Result<Vec<Segment>, AbodeError> {
        let mut segments: Vec<Segment> = vec![];
        for (pos, &i) in order.iter().enumerate() {
            match segments.last_mut() {
                Some(seg) if seg.episode_id == episode_ids[i] => {
                    if seg.environment_id != environment_ids[i] {
                        return Err(AbodeError::DataIntegrityError(format!(
                            "Episode id {} appears in environments {} and {}",
                            episode_ids[i], seg.environment_id, environment_ids[i]
                        )));
                    }
                    seg.len += 1;
                }
                _ => segments.push(Segment {
                    episode_id: episode_ids[i],
                    environment_id: environment_ids[i],
                    offset: pos,
                    len: 1,
                }),
            }
        }
        Ok(segments)
    }

    /// Number of records, `T * N`.
    pub fn len(&self) -> usize {
        self.select_inds.len()
    }

    /// Returns `true` for the descriptor of an empty window.
    pub fn is_empty(&self) -> bool {
        self.select_inds.is_empty()
    }

    /// Number of packed sequences.
    pub fn num_sequences(&self) -> usize {
        self.sequence_lengths.len()
    }

    /// Number of distinct environments, the batch size of the hidden state.
    pub fn num_environments(&self) -> usize {
        self.last_sequence_in_batch_inds.len()
    }

    /// Length of the longest sequence.
    pub fn max_length(&self) -> usize {
        self.num_seqs_at_step.len()
    }

    /// Permutation restoring the flat row order from the packed order.
    pub fn inverse_select_inds(&self) -> Vec<usize> {
        invert_permutation(&self.select_inds)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{array, Array2};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_dones(rng: &mut StdRng, t: usize, n: usize) -> Array2<bool> {
        Array2::from_shape_fn((t, n), |_| rng.gen_bool(0.3))
    }

    #[test]
    fn test_all_false_is_one_episode_per_column() {
        let dones = Array2::from_elem((4, 2), false);
        let info = SequenceDescriptor::from_dones(dones.view()).unwrap();

        assert_eq!(info.num_seqs_at_step, vec![2, 2, 2, 2]);
        assert_eq!(info.sequence_lengths, vec![4, 4]);
        assert_eq!(info.select_inds, (0..8).collect::<Vec<_>>());
        assert_eq!(info.sequence_starts, vec![0, 1]);
        assert_eq!(info.rnn_state_batch_inds, vec![0, 1]);
        assert_eq!(info.first_sequence_in_batch_mask, vec![true, true]);
        assert_eq!(info.last_sequence_in_batch_mask, vec![true, true]);
    }

    #[test]
    fn test_single_done_mid_window() {
        let dones = array![[false], [true], [false], [false]];
        let info = SequenceDescriptor::from_dones(dones.view()).unwrap();

        assert_eq!(info.sequence_lengths, vec![2, 2]);
        assert_eq!(info.num_seqs_at_step, vec![2, 2]);
        assert_eq!(info.select_inds, vec![0, 2, 1, 3]);
        assert_eq!(info.sequence_starts, vec![0, 2]);
        assert_eq!(info.rnn_state_batch_inds, vec![0, 0]);
        assert_eq!(info.first_sequence_in_batch_mask, vec![true, false]);
        assert_eq!(info.last_sequence_in_batch_mask, vec![false, true]);
        assert_eq!(info.num_environments(), 1);
    }

    #[test]
    fn test_descending_lengths() {
        // slot 0: [row 0], [rows 2, 4]; slot 1: [rows 1, 3, 5]
        let dones = array![[true, false], [false, false], [false, false]];
        let info = SequenceDescriptor::from_dones(dones.view()).unwrap();

        assert_eq!(info.sequence_lengths, vec![3, 2, 1]);
        assert_eq!(info.num_seqs_at_step, vec![3, 2, 1]);
        assert_eq!(info.select_inds, vec![1, 2, 0, 3, 4, 5]);
        assert_eq!(info.sequence_starts, vec![1, 2, 0]);
        assert_eq!(info.sequence_environments, vec![1, 0, 0]);
        assert_eq!(info.rnn_state_batch_inds, vec![1, 0, 0]);
        assert_eq!(info.first_sequence_in_batch_mask, vec![true, false, true]);
        assert_eq!(info.last_sequence_in_batch_mask, vec![true, true, false]);
        assert_eq!(info.first_sequence_in_batch_inds, vec![0, 2]);
        assert_eq!(info.last_sequence_in_batch_inds, vec![0, 1]);
        assert_eq!(info.inverse_select_inds(), vec![2, 0, 1, 3, 4, 5]);
    }

    #[test]
    fn test_done_at_last_step() {
        let dones = array![[false, false], [false, true]];
        let info = SequenceDescriptor::from_dones(dones.view()).unwrap();

        assert_eq!(info.num_sequences(), 2);
        assert_eq!(info.num_seqs_at_step, vec![2, 2]);
    }

    #[test]
    fn test_random_windows() {
        let mut rng = StdRng::seed_from_u64(42);

        for &t in [1, 2, 5, 16].iter() {
            for &n in [1, 3, 4].iter() {
                for _ in 0..10 {
                    let dones = random_dones(&mut rng, t, n);
                    let info = SequenceDescriptor::from_dones(dones.view()).unwrap();

                    // select_inds is a permutation of 0..T*N
                    let mut sorted = info.select_inds.clone();
                    sorted.sort_unstable();
                    assert_eq!(sorted, (0..t * n).collect::<Vec<_>>());

                    // the batch-size schedule is non-increasing and covers every record
                    assert!(info.num_seqs_at_step.windows(2).all(|w| w[0] >= w[1]));
                    assert_eq!(info.num_seqs_at_step[0], info.num_sequences());
                    assert_eq!(info.num_seqs_at_step.iter().sum::<usize>(), t * n);
                    assert!(info.sequence_lengths.windows(2).all(|w| w[0] >= w[1]));
                    for (depth, &n_active) in info.num_seqs_at_step.iter().enumerate() {
                        let expected = info
                            .sequence_lengths
                            .iter()
                            .filter(|&&l| l > depth)
                            .count();
                        assert_eq!(n_active, expected);
                    }

                    // exactly one first and one last segment per slot
                    assert_eq!(info.first_sequence_in_batch_inds.len(), n);
                    assert_eq!(info.last_sequence_in_batch_inds.len(), n);
                    assert_eq!(info.num_environments(), n);

                    // no done before the last row means one segment per slot
                    let inner_dones = dones.slice(ndarray::s![..t - 1, ..]).iter().any(|&d| d);
                    if !inner_dones {
                        assert_eq!(info.num_seqs_at_step[0], n);
                    }
                }
            }
        }
    }

    #[test]
    fn test_duplicated_key() {
        // Two slots mapped to the same episode id at the same step.
        let err = SequenceDescriptor::from_episode_ids(&[0, 0], &[0, 1], &[0, 0]).unwrap_err();
        assert!(err.is_data_integrity());
    }

    #[test]
    fn test_key_overflow() {
        let err = SequenceDescriptor::from_episode_ids(&[0], &[0], &[i64::MAX]).unwrap_err();
        assert!(err.is_data_integrity());

        let err = SequenceDescriptor::from_episode_ids(&[i64::MAX], &[0], &[1]).unwrap_err();
        assert!(err.is_data_integrity());
    }

    #[test]
    fn test_episode_shared_by_environments() {
        let err = SequenceDescriptor::from_episode_ids(&[5, 5], &[0, 1], &[0, 1]).unwrap_err();
        assert!(err.is_data_integrity());
    }

    #[test]
    fn test_mismatched_lengths() {
        let err = SequenceDescriptor::from_episode_ids(&[0, 1], &[0], &[0, 0]).unwrap_err();
        assert!(err.is_data_integrity());
    }

    #[test]
    fn test_empty_window() {
        let info = SequenceDescriptor::from_episode_ids(&[], &[], &[]).unwrap();
        assert!(info.is_empty());
        assert_eq!(info, SequenceDescriptor::default());

        let dones = Array2::from_elem((0, 4), false);
        assert!(SequenceDescriptor::from_dones(dones.view()).unwrap().is_empty());
    }
}
