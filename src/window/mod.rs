pub mod marker_indices;
pub mod sliding_window;

pub use marker_indices::MarkerIndices;
pub use sliding_window::{RefPanel, Window, WindowSrc};
