//! Episode-aligned sequence packing for recurrent networks.
//!
//! A rollout window of `T` steps over `N` environments is stored as a flat
//! `(T * N)` batch in row-major `(t, n)` order. Episodes end at arbitrary steps,
//! so each environment contributes one or more *episode segments* to the window.
//! A recurrent network has to run over every segment separately, starting from
//! the right hidden state.
//!
//! [`EpisodeIndex`] labels every record with a globally unique episode id, and
//! [`SequenceDescriptor`] computes the permutation and batch-size schedule of the
//! packed layout. Given the segments `[c]`, `[x, y, z]` and `[a, b]`, the packed
//! data is `[x, a, c, y, b, z]` with `num_seqs_at_step = [3, 2, 1]`: reading the
//! data in chunks by depth gives exactly the segments still active at that depth.
mod episode;
mod packer;
pub use episode::EpisodeIndex;
pub use packer::{invert_permutation, SequenceDescriptor};
