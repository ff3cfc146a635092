//! Domain model: spaces, collections, labels and tasks.

mod ops;
pub mod rank;
mod types;

pub use ops::{
  complete_task, insert_task, move_task, place, remove_task, rename_label, reorder, set_pinned, sort_by_rank,
  toggle_pin, EditError, Ranked,
};
pub use rank::RankError;
pub use types::{Collection, EntityId, Label, Space, Task};
