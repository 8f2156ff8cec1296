//! BIF Math - colour and raster math shared by the film and the renderer.

// Re-export glam for convenience
pub use glam::*;

mod color;
mod color_space;
mod rect;

pub use color::{ColorExt, Rgb, Rgba};
pub use color_space::ColorSpace;
pub use rect::PixelRect;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_is_vec4() {
        let c: Rgba = Rgba::new(1.0, 0.5, 0.25, 1.0);
        assert_eq!(c.truncate(), Rgb::new(1.0, 0.5, 0.25));
        assert_eq!(c.w, 1.0);
    }
}
