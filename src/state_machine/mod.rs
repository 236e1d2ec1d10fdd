mod item;
mod state;

pub use item::WorkItem;
pub use state::ItemState;
