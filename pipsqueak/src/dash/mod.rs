pub mod controller;
pub mod render;
pub mod saver;
pub mod scroll;

pub use controller::{Dashboard, DisplayState, Flow, Key, ViewMode};
pub use render::{IdFormat, Renderer, Span, Style, Tone};
pub use scroll::ScrollWindow;
