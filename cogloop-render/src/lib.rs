pub mod render;

pub use render::{PixmapDisplay, rasterize};
