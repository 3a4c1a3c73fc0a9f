// Video compositor
//
// Every tick the pipeline hands the compositor the newest frame of each
// video source. Sources are painted in order onto a black canvas the size of
// the base resolution, then scaled to the output resolution. Both steps are
// folded into one nearest-neighbour pass over the output pixels.

use super::backend::VideoFrame;

const BLACK: [u8; 4] = [0, 0, 0, 255];

/// Destination rectangle, in canvas pixels (may hang off the canvas)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Where a `src_w`x`src_h` frame lands on a `canvas_w`x`canvas_h` canvas
///
/// Stretched sources are scaled to fit while keeping their aspect ratio and
/// centered (letterbox/pillarbox). Other sources keep their native size and
/// are centered, cropping whatever does not fit.
pub fn place(src_w: u32, src_h: u32, canvas_w: u32, canvas_h: u32, stretch: bool) -> Placement {
    let (src_w, src_h) = (src_w as i64, src_h as i64);
    let (canvas_w, canvas_h) = (canvas_w as i64, canvas_h as i64);

    let (width, height) = if stretch {
        // Compare aspect ratios without floating point
        if src_w * canvas_h >= canvas_w * src_h {
            (canvas_w, (src_h * canvas_w / src_w).max(1))
        } else {
            ((src_w * canvas_h / src_h).max(1), canvas_h)
        }
    } else {
        (src_w, src_h)
    };

    Placement {
        x: (canvas_w - width) / 2,
        y: (canvas_h - height) / 2,
        width,
        height,
    }
}

struct Layer {
    stretch: bool,
    frame: Option<VideoFrame>,
}

/// Composites one layer per video source
pub struct Compositor {
    base_width: u32,
    base_height: u32,
    output_width: u32,
    output_height: u32,
    layers: Vec<Layer>,
}

impl Compositor {
    pub fn new(base_width: u32, base_height: u32, output_width: u32, output_height: u32) -> Self {
        Self {
            base_width,
            base_height,
            output_width,
            output_height,
            layers: Vec::new(),
        }
    }

    /// Register a source; returns its layer index (paint order)
    pub fn add_layer(&mut self, stretch: bool) -> usize {
        self.layers.push(Layer {
            stretch,
            frame: None,
        });
        self.layers.len() - 1
    }

    /// Replace the frame shown by a layer. The previous frame stays on
    /// screen until a new one arrives
    pub fn update(&mut self, layer: usize, frame: VideoFrame) {
        if let Some(layer) = self.layers.get_mut(layer) {
            if frame.is_well_formed() {
                layer.frame = Some(frame);
            }
        }
    }

    /// Remove a degraded layer's content
    pub fn clear(&mut self, layer: usize) {
        if let Some(layer) = self.layers.get_mut(layer) {
            layer.frame = None;
        }
    }

    /// Paint all layers into a new output-sized frame
    pub fn compose(&self, timestamp_ms: u64) -> VideoFrame {
        let (out_w, out_h) = (self.output_width as i64, self.output_height as i64);
        let mut data = Vec::with_capacity((out_w * out_h * 4) as usize);
        for _ in 0..(out_w * out_h) {
            data.extend_from_slice(&BLACK);
        }

        for layer in &self.layers {
            let Some(frame) = &layer.frame else {
                continue;
            };
            let placement = place(
                frame.width,
                frame.height,
                self.base_width,
                self.base_height,
                layer.stretch,
            );
            self.blit(&mut data, frame, placement);
        }

        VideoFrame {
            width: self.output_width,
            height: self.output_height,
            data,
            timestamp_ms,
        }
    }

    /// Nearest-neighbour copy of `frame` into the output, mapping the
    /// canvas placement into output coordinates
    fn blit(&self, out: &mut [u8], frame: &VideoFrame, placement: Placement) {
        let (base_w, base_h) = (self.base_width as i64, self.base_height as i64);
        let (out_w, out_h) = (self.output_width as i64, self.output_height as i64);

        let x0 = placement.x * out_w / base_w;
        let y0 = placement.y * out_h / base_h;
        let x1 = (placement.x + placement.width) * out_w / base_w;
        let y1 = (placement.y + placement.height) * out_h / base_h;
        let (dst_w, dst_h) = (x1 - x0, y1 - y0);
        if dst_w <= 0 || dst_h <= 0 {
            return;
        }

        let (src_w, src_h) = (frame.width as i64, frame.height as i64);
        let cols: Vec<(usize, usize)> = (x0.max(0)..x1.min(out_w))
            .map(|dx| {
                let sx = ((dx - x0) * src_w / dst_w).min(src_w - 1);
                (dx as usize, sx as usize)
            })
            .collect();

        for dy in y0.max(0)..y1.min(out_h) {
            let sy = ((dy - y0) * src_h / dst_h).min(src_h - 1);
            let src_row = sy as usize * src_w as usize * 4;
            let dst_row = dy as usize * out_w as usize * 4;
            for &(dx, sx) in &cols {
                let s = src_row + sx * 4;
                let d = dst_row + dx * 4;
                out[d..d + 4].copy_from_slice(&frame.data[s..s + 4]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];

    fn pixel(frame: &VideoFrame, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * frame.width + x) * 4) as usize;
        [
            frame.data[i],
            frame.data[i + 1],
            frame.data[i + 2],
            frame.data[i + 3],
        ]
    }

    #[test]
    fn test_letterbox_wide_source() {
        let p = place(1920, 1080, 1000, 1000, true);
        assert_eq!(p.width, 1000);
        assert_eq!(p.height, 562);
        assert_eq!(p.x, 0);
        assert_eq!(p.y, 219);
    }

    #[test]
    fn test_pillarbox_tall_source() {
        let p = place(1080, 1920, 1920, 1080, true);
        assert_eq!(p.height, 1080);
        assert_eq!(p.width, 607);
        assert_eq!(p.y, 0);
    }

    #[test]
    fn test_unstretched_source_is_centered() {
        let p = place(100, 50, 200, 100, false);
        assert_eq!(p, Placement { x: 50, y: 25, width: 100, height: 50 });
    }

    #[test]
    fn test_compose_letterboxes_onto_black() {
        let mut compositor = Compositor::new(4, 4, 4, 4);
        let layer = compositor.add_layer(true);
        compositor.update(layer, VideoFrame::filled(4, 2, WHITE, 0));

        let out = compositor.compose(0);
        assert_eq!(pixel(&out, 0, 0), BLACK);
        assert_eq!(pixel(&out, 0, 1), WHITE);
        assert_eq!(pixel(&out, 3, 2), WHITE);
        assert_eq!(pixel(&out, 3, 3), BLACK);
    }

    #[test]
    fn test_compose_scales_to_output() {
        let mut compositor = Compositor::new(8, 8, 2, 2);
        let layer = compositor.add_layer(true);
        compositor.update(layer, VideoFrame::filled(8, 8, WHITE, 0));

        let out = compositor.compose(33);
        assert_eq!((out.width, out.height), (2, 2));
        assert_eq!(out.timestamp_ms, 33);
        assert!(out.data.chunks_exact(4).all(|px| px == WHITE));
    }

    #[test]
    fn test_cleared_layer_is_not_painted() {
        let mut compositor = Compositor::new(2, 2, 2, 2);
        let layer = compositor.add_layer(false);
        compositor.update(layer, VideoFrame::filled(2, 2, WHITE, 0));
        compositor.clear(layer);

        let out = compositor.compose(0);
        assert!(out.data.chunks_exact(4).all(|px| px == BLACK));
    }
}
