use std::time::{Duration, Instant};

use cogloop_core::{ArrowDirection, Display, DisplayError, Stimulus, StimulusType};
use cogloop_timing::{HighPrecisionTimer, Timer};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};

const TEXT_PANEL_ALPHA: u8 = 96;

fn paint_for(color: [u8; 4]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.set_color(Color::from_rgba8(color[0], color[1], color[2], color[3]));
    paint
}

fn draw_error(name: &str, reason: impl Into<String>) -> DisplayError {
    DisplayError::Draw {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn fill_rect(
    pixmap: &mut Pixmap,
    name: &str,
    (x, y, w, h): (f32, f32, f32, f32),
    paint: &Paint,
) -> Result<(), DisplayError> {
    let rect = Rect::from_xywh(x, y, w, h)
        .ok_or_else(|| draw_error(name, format!("degenerate rect {w}x{h}")))?;
    pixmap.fill_rect(rect, paint, Transform::identity(), None);
    Ok(())
}

/// Draws `shape` centred on `(cx, cy)` in canvas pixels.
///
/// Text has no glyph backend here; it is drawn as a translucent panel sized to
/// the string so layouts stay visible.
pub fn rasterize(
    pixmap: &mut Pixmap,
    name: &str,
    shape: &StimulusType,
    (cx, cy): (f32, f32),
) -> Result<(), DisplayError> {
    match shape {
        StimulusType::Circle { radius, color } => {
            let mut pb = PathBuilder::new();
            pb.push_circle(cx, cy, *radius);
            let path = pb
                .finish()
                .ok_or_else(|| draw_error(name, format!("radius {radius}")))?;
            pixmap.fill_path(
                &path,
                &paint_for(*color),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
        StimulusType::Rectangle {
            width,
            height,
            color,
        } => {
            let bounds = (cx - width * 0.5, cy - height * 0.5, *width, *height);
            fill_rect(pixmap, name, bounds, &paint_for(*color))?;
        }
        StimulusType::Arrow {
            direction,
            size,
            color,
        } => {
            let mut pb = PathBuilder::new();
            match direction {
                ArrowDirection::Right => {
                    pb.move_to(cx + size, cy);
                    pb.line_to(cx, cy - size);
                    pb.line_to(cx, cy + size);
                }
                ArrowDirection::Left => {
                    pb.move_to(cx - size, cy);
                    pb.line_to(cx, cy - size);
                    pb.line_to(cx, cy + size);
                }
                ArrowDirection::Up => {
                    pb.move_to(cx, cy - size);
                    pb.line_to(cx - size, cy);
                    pb.line_to(cx + size, cy);
                }
                ArrowDirection::Down => {
                    pb.move_to(cx, cy + size);
                    pb.line_to(cx - size, cy);
                    pb.line_to(cx + size, cy);
                }
            }
            pb.close();
            let path = pb
                .finish()
                .ok_or_else(|| draw_error(name, format!("arrow size {size}")))?;
            pixmap.fill_path(
                &path,
                &paint_for(*color),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
        StimulusType::Cross {
            size,
            thickness,
            color,
        } => {
            let paint = paint_for(*color);
            let half = size * 0.5;
            let t = thickness * 0.5;
            fill_rect(pixmap, name, (cx - half, cy - t, *size, *thickness), &paint)?;
            fill_rect(pixmap, name, (cx - t, cy - half, *thickness, *size), &paint)?;
        }
        StimulusType::Text {
            content,
            size,
            color,
        } => {
            log::trace!("text {name}: {content:?}");
            if content.is_empty() {
                return Ok(());
            }
            let w = content.chars().count() as f32 * size * 0.5;
            let mut panel = *color;
            panel[3] = panel[3].min(TEXT_PANEL_ALPHA);
            fill_rect(
                pixmap,
                name,
                (cx - w * 0.5, cy - size * 0.5, w, *size),
                &paint_for(panel),
            )?;
        }
    }
    Ok(())
}

/// Offscreen double-buffered display paced to a fixed refresh rate.
///
/// `draw` rasterises into the back buffer. `present` waits for the next
/// refresh boundary, swaps buffers and clears the new back buffer.
pub struct PixmapDisplay {
    back: Pixmap,
    front: Pixmap,
    background: Color,
    timer: HighPrecisionTimer,
    refresh: Duration,
    next_frame: Option<Instant>,
    last_present: Option<Instant>,
    pending: Vec<String>,
    last_frame: Vec<String>,
    presented: u64,
}

impl PixmapDisplay {
    pub fn new(width: u32, height: u32, refresh_hz: f64) -> Result<Self, DisplayError> {
        if !(refresh_hz.is_finite() && refresh_hz > 0.0) {
            return Err(DisplayError::Present(format!(
                "invalid refresh rate {refresh_hz}"
            )));
        }
        let alloc = || {
            Pixmap::new(width, height)
                .ok_or_else(|| DisplayError::Present(format!("cannot allocate {width}x{height}")))
        };
        let background = Color::from_rgba8(0, 0, 0, 255);
        let mut back = alloc()?;
        let mut front = alloc()?;
        back.fill(background);
        front.fill(background);

        Ok(Self {
            back,
            front,
            background,
            timer: HighPrecisionTimer::new(),
            refresh: Duration::from_secs_f64(1.0 / refresh_hz),
            next_frame: None,
            last_present: None,
            pending: Vec::new(),
            last_frame: Vec::new(),
            presented: 0,
        })
    }

    pub fn with_background(mut self, color: [u8; 4]) -> Self {
        self.background = Color::from_rgba8(color[0], color[1], color[2], color[3]);
        self.back.fill(self.background);
        self.front.fill(self.background);
        self
    }

    pub fn width(&self) -> u32 {
        self.front.width()
    }

    pub fn height(&self) -> u32 {
        self.front.height()
    }

    /// The last presented frame.
    pub fn pixmap(&self) -> &Pixmap {
        &self.front
    }

    /// Names drawn into the last presented frame, in draw order.
    pub fn last_frame(&self) -> &[String] {
        &self.last_frame
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    pub fn timer(&self) -> &HighPrecisionTimer {
        &self.timer
    }

    fn centre(&self) -> (f32, f32) {
        (self.back.width() as f32 * 0.5, self.back.height() as f32 * 0.5)
    }
}

impl Display for PixmapDisplay {
    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    fn draw(&mut self, name: &str, stimulus: &Stimulus) -> Result<(), DisplayError> {
        let (ox, oy) = self.centre();
        let (px, py) = stimulus.position;
        rasterize(&mut self.back, name, &stimulus.shape, (ox + px, oy + py))?;
        self.pending.push(name.to_string());
        Ok(())
    }

    fn present(&mut self) -> Result<Duration, DisplayError> {
        if let Some(deadline) = self.next_frame {
            self.timer.sleep_until(deadline);
        }
        let now = Instant::now();

        std::mem::swap(&mut self.back, &mut self.front);
        self.back.fill(self.background);
        std::mem::swap(&mut self.pending, &mut self.last_frame);
        self.pending.clear();

        // Resync after a missed deadline instead of bursting to catch up.
        let mut next = self.next_frame.unwrap_or(now) + self.refresh;
        if next <= now {
            log::trace!("frame {} missed its deadline", self.presented);
            next = now + self.refresh;
        }
        self.next_frame = Some(next);

        let frame = self
            .last_present
            .map(|prev| now.duration_since(prev))
            .unwrap_or(self.refresh);
        self.last_present = Some(now);
        self.presented += 1;
        self.timer.record_frame(frame);
        Ok(frame)
    }
}
