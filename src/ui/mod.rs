//! Terminal output for the initguard CLI.

mod colors;
mod render;

pub use colors::{Palette, Theme};
pub use render::TextRenderer;
