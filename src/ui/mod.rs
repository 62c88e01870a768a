pub mod icons;
pub mod progress;

pub use progress::{TaskUI, print_checkpoint_summary, print_status};
