// ── Reactive state store ──
//
// Typed cells, keyed tables of cells, and the per-subscriber fan-out that
// delivers their changes.

mod broadcast;
mod cell;
mod change;
mod erased;
mod options;
mod table;

pub use broadcast::{ChangeBroadcaster, SUBSCRIBER_CAPACITY, Subscription};
pub use cell::TypedCell;
pub use change::{Change, ChangeStream, ChangeType};
pub use erased::ErasedCell;
pub use options::{CellOptions, PullOptions, WriteOptions};
pub use table::KeyedCellTable;
