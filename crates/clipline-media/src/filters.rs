//! FFmpeg filter graphs for the vertical clip layouts.
//!
//! All layouts render onto a 1080x1920 canvas so one ASS caption document
//! works unchanged across formats. The split layout letterboxes the full
//! frame into the top third and fills the bottom two thirds with a zoom
//! crop; the center layout fills the whole canvas with the crop;
//! fullscreen overlays the aspect-preserved source on a blurred fill.

use clipline_models::Rect;

/// Output canvas dimensions.
pub const CANVAS_W: u32 = 1080;
pub const CANVAS_H: u32 = 1920;

/// Split layout panel heights.
pub const SPLIT_TOP_H: u32 = 640;
pub const SPLIT_BOTTOM_H: u32 = 1280;

/// How the zoomed portion of a layout is positioned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomCrop {
    /// Tight crop on a detected subject box (source pixels).
    Bbox(Rect),
    /// Horizontal shift to a normalized x center (0=left, 1=right).
    CenterX(f64),
    /// Plain centered crop.
    Centered,
}

/// Escape a path for use inside an ffmpeg filter argument.
pub fn escape_filter_path(path: &str) -> String {
    path.replace(':', "\\:")
}

/// Append the subtitle burn-in stage to a filter chain ending in `[base]`.
fn with_ass(chain: String, ass_path: Option<&str>, fonts_dir: Option<&str>) -> String {
    match ass_path {
        Some(ass) => {
            let mut stage = format!("ass={}", escape_filter_path(ass));
            if let Some(fonts) = fonts_dir {
                stage.push_str(&format!(":fontsdir={}", escape_filter_path(fonts)));
            }
            format!("{};[base]{}[out]", chain, stage)
        }
        None => chain.replace("[base]", "[out]"),
    }
}

/// Fullscreen layout: blurred 9:16 center crop behind the aspect-preserved
/// source.
pub fn fullscreen_filter(ass_path: Option<&str>, fonts_dir: Option<&str>) -> String {
    let chain = format!(
        "[0:v]split[bg][fg];\
         [bg]crop=ih*9/16:ih,scale={w}:{h},boxblur=20:20[bgout];\
         [fg]scale={w}:-2:force_original_aspect_ratio=decrease[fgout];\
         [bgout][fgout]overlay=(W-w)/2:(H-h)/2[base]",
        w = CANVAS_W,
        h = CANVAS_H
    );
    with_ass(chain, ass_path, fonts_dir)
}

/// Split layout: letterboxed full frame over a zoomed crop.
pub fn split_filter(
    source_w: u32,
    source_h: u32,
    crop: ZoomCrop,
    ass_path: Option<&str>,
    fonts_dir: Option<&str>,
) -> String {
    let bottom = split_bottom_chain(source_w, source_h, crop);
    let chain = format!(
        "[0:v]split=2[vt][vb];\
         [vt]scale={w}:-2,pad={w}:{top_h}:(ow-iw)/2:(oh-ih)/2:black[top];\
         {bottom};\
         [top][bot]vstack[base]",
        w = CANVAS_W,
        top_h = SPLIT_TOP_H,
        bottom = bottom
    );
    with_ass(chain, ass_path, fonts_dir)
}

/// Bottom-panel chain for the split layout.
fn split_bottom_chain(source_w: u32, source_h: u32, crop: ZoomCrop) -> String {
    match crop {
        ZoomCrop::Bbox(bbox) => {
            let clamped = bbox.clamp_within(source_w as f64, source_h as f64);
            let (x, y, w, h) = clamped.even_aligned();
            format!(
                "[vb]crop={w}:{h}:{x}:{y},\
                 scale={cw}:{ch}:force_original_aspect_ratio=increase,\
                 crop={cw}:{ch}[bot]",
                w = w,
                h = h,
                x = x,
                y = y,
                cw = CANVAS_W,
                ch = SPLIT_BOTTOM_H
            )
        }
        ZoomCrop::CenterX(fx) => {
            let x = zoom_pan_x(source_w, source_h, SPLIT_BOTTOM_H, fx);
            format!(
                "[vb]scale=-2:{ch},crop={cw}:{ch}:{x}:0[bot]",
                cw = CANVAS_W,
                ch = SPLIT_BOTTOM_H,
                x = x
            )
        }
        ZoomCrop::Centered => format!(
            "[vb]scale=-2:{ch},crop={cw}:{ch}[bot]",
            cw = CANVAS_W,
            ch = SPLIT_BOTTOM_H
        ),
    }
}

/// Center layout: a 9:16 strip of the source scaled to fill the canvas.
pub fn center_filter(
    source_w: u32,
    source_h: u32,
    crop: ZoomCrop,
    ass_path: Option<&str>,
    fonts_dir: Option<&str>,
) -> String {
    let crop_w = even(source_h as i64 * 9 / 16);
    let crop_stage = match crop {
        ZoomCrop::CenterX(fx) => {
            let max_x = source_w as i64 - crop_w;
            let x = even(
                ((fx * source_w as f64 - crop_w as f64 / 2.0) as i64).clamp(0, max_x.max(0)),
            );
            format!("crop={}:ih:{}:0", crop_w, x)
        }
        ZoomCrop::Bbox(bbox) => {
            // Center layout only pans horizontally; use the box center.
            let max_x = source_w as i64 - crop_w;
            let x = even(
                ((bbox.center_x() - crop_w as f64 / 2.0) as i64).clamp(0, max_x.max(0)),
            );
            format!("crop={}:ih:{}:0", crop_w, x)
        }
        ZoomCrop::Centered => format!("crop={}:ih", crop_w),
    };

    let chain = format!(
        "[0:v]{crop},scale={w}:{h}[base]",
        crop = crop_stage,
        w = CANVAS_W,
        h = CANVAS_H
    );
    with_ass(chain, ass_path, fonts_dir)
}

/// Portrait sources: scale and pad onto the canvas, no cropping.
pub fn portrait_filter(ass_path: Option<&str>, fonts_dir: Option<&str>) -> String {
    let chain = format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black[base]",
        w = CANVAS_W,
        h = CANVAS_H
    );
    with_ass(chain, ass_path, fonts_dir)
}

/// Horizontal crop offset after scaling the source to `target_h` tall.
fn zoom_pan_x(source_w: u32, source_h: u32, target_h: u32, fx: f64) -> i64 {
    if source_h == 0 {
        return 0;
    }
    let scaled_w = even(source_w as i64 * target_h as i64 / source_h as i64);
    let max_x = (scaled_w - CANVAS_W as i64).max(0);
    even(((fx * scaled_w as f64) as i64 - CANVAS_W as i64 / 2).clamp(0, max_x))
}

fn even(v: i64) -> i64 {
    (v.max(0) / 2) * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullscreen_filter_shape() {
        let filter = fullscreen_filter(None, None);
        assert!(filter.contains("boxblur"));
        assert!(filter.contains("overlay"));
        assert!(filter.ends_with("[out]"));
        assert!(!filter.contains("ass="));
    }

    #[test]
    fn test_ass_stage_appended_with_escaping() {
        let filter = fullscreen_filter(Some("/tmp/c:aps.ass"), Some("/fonts"));
        assert!(filter.contains("ass=/tmp/c\\:aps.ass:fontsdir=/fonts"));
        assert!(filter.ends_with("[out]"));
    }

    #[test]
    fn test_split_filter_bbox_is_clamped_and_even() {
        let bbox = Rect::new(1800.0, 900.0, 400.0, 400.0); // pokes outside 1920x1080
        let filter = split_filter(1920, 1080, ZoomCrop::Bbox(bbox), None, None);
        assert!(filter.contains("vstack"));
        // Clamped to the right/bottom edge: x = 1920-400 = 1520, y = 1080-400 = 680
        assert!(filter.contains("crop=400:400:1520:680"), "{}", filter);
    }

    #[test]
    fn test_split_filter_center_x_clamps_to_frame() {
        // fx far right: crop x must not exceed scaled_w - 1080
        let filter = split_filter(1920, 1080, ZoomCrop::CenterX(1.0), None, None);
        // scaled width = 1920*1280/1080 = 2275 -> even 2274; max x = 1194
        assert!(filter.contains("crop=1080:1280:1194:0"), "{}", filter);
    }

    #[test]
    fn test_center_filter_default_centered() {
        let filter = center_filter(1920, 1080, ZoomCrop::Centered, None, None);
        // 9:16 strip of a 1080-tall source is 606 wide -> even 606
        assert!(filter.contains("crop=606:ih"), "{}", filter);
        assert!(filter.contains("scale=1080:1920"));
    }

    #[test]
    fn test_center_filter_panned_left() {
        let filter = center_filter(1920, 1080, ZoomCrop::CenterX(0.2), None, None);
        // x = 0.2*1920 - 303 = 81 -> even 80
        assert!(filter.contains("crop=606:ih:80:0"), "{}", filter);
    }

    #[test]
    fn test_portrait_filter_pads() {
        let filter = portrait_filter(None, None);
        assert!(filter.contains("pad=1080:1920"));
    }
}
