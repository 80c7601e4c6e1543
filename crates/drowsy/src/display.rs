//! Preview output for annotated frames.

use anyhow::Result;
use drowsy_hw::Frame;

/// Somewhere to show annotated frames and poll for a quit request.
pub trait Display {
    fn show(&mut self, frame: &Frame) -> Result<()>;

    /// True once the user pressed `q`/Esc or closed the window.
    fn quit_requested(&self) -> bool;

    fn close(&mut self) {}
}

/// Discards frames. Used for `--headless` runs and still-image detection.
#[derive(Default)]
pub struct Headless;

impl Display for Headless {
    fn show(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn quit_requested(&self) -> bool {
        false
    }
}

/// Convert packed RGB to the 0RGB u32 layout the window expects.
pub fn rgb_to_argb(buf: &[u8], width: usize, height: usize) -> Vec<u32> {
    buf.chunks_exact(3)
        .take(width * height)
        .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32)
        .collect()
}

#[cfg(feature = "window")]
pub use window::WindowDisplay;

#[cfg(feature = "window")]
mod window {
    use super::{rgb_to_argb, Display};
    use anyhow::{Context, Result};
    use drowsy_hw::Frame;
    use minifb::{Key, Window, WindowOptions};

    /// A native window, opened lazily at the size of the first frame.
    pub struct WindowDisplay {
        title: String,
        target_fps: usize,
        window: Option<Window>,
        closed: bool,
    }

    impl WindowDisplay {
        pub fn new(title: &str, target_fps: u32) -> Self {
            Self {
                title: title.to_string(),
                target_fps: target_fps as usize,
                window: None,
                closed: false,
            }
        }
    }

    impl Display for WindowDisplay {
        fn show(&mut self, frame: &Frame) -> Result<()> {
            let (w, h) = (frame.width as usize, frame.height as usize);

            if self.window.is_none() {
                let mut window = Window::new(&self.title, w, h, WindowOptions::default())
                    .context("failed to open preview window")?;
                window.set_target_fps(self.target_fps);
                self.window = Some(window);
            }
            let Some(window) = self.window.as_mut() else {
                return Ok(());
            };

            window
                .update_with_buffer(&rgb_to_argb(&frame.data, w, h), w, h)
                .context("failed to update preview window")?;

            if !window.is_open() || window.is_key_down(Key::Escape) || window.is_key_down(Key::Q) {
                self.closed = true;
            }
            Ok(())
        }

        fn quit_requested(&self) -> bool {
            self.closed
        }

        fn close(&mut self) {
            self.window = None;
        }
    }
}
