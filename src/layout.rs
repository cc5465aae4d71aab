use clap::ValueEnum;

/// how an image is mapped onto a page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FitMode {
    /// scale uniformly to fit inside the page
    #[default]
    Contain,
    /// scale uniformly to cover the whole page, overflow is clipped
    Cover,
    /// fill the page exactly, ignoring aspect ratio
    Stretch,
}

/// image rectangle on a page, in points from the bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Placement {
    /// draw the image untransformed at its own size
    pub fn native(width: f32, height: f32) -> Self {
        Placement {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }
}

/// place an image of `img_w`x`img_h` on a `page_w`x`page_h` page, centered
pub fn fit_image(img_w: f32, img_h: f32, page_w: f32, page_h: f32, mode: FitMode) -> Placement {
    let img_ratio = img_w / img_h;
    let page_ratio = page_w / page_h;
    // ties fall through to the else branch in both uniform modes
    let wider = img_ratio > page_ratio;

    let (width, height) = match mode {
        FitMode::Contain if wider => (page_w, page_w / img_ratio),
        FitMode::Contain => (page_h * img_ratio, page_h),
        FitMode::Cover if wider => (page_h * img_ratio, page_h),
        FitMode::Cover => (page_w, page_w / img_ratio),
        FitMode::Stretch => return Placement::native(page_w, page_h),
    };

    Placement {
        x: (page_w - width) / 2.0,
        y: (page_h - height) / 2.0,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

    const IMAGES: [(f32, f32); 6] = [
        (100.0, 100.0),
        (1920.0, 1080.0),
        (1080.0, 1920.0),
        (595.0, 842.0),
        (1.0, 500.0),
        (3000.0, 7.0),
    ];

    const PAGES: [(f32, f32); 3] = [(595.0, 842.0), (612.0, 792.0), (612.0, 1008.0)];

    fn assert_centered(p: Placement, page_w: f32, page_h: f32) {
        // overflowing cover placements get large, so scale the tolerance
        let tol = EPS * p.width.max(p.height).max(1.0);
        assert!((p.x + p.width / 2.0 - page_w / 2.0).abs() < tol, "{p:?}");
        assert!((p.y + p.height / 2.0 - page_h / 2.0).abs() < tol, "{p:?}");
    }

    #[test]
    fn stretch_fills_page() {
        for (iw, ih) in IMAGES {
            for (pw, ph) in PAGES {
                let p = fit_image(iw, ih, pw, ph, FitMode::Stretch);
                assert_eq!(p, Placement::native(pw, ph));
            }
        }
    }

    #[test]
    fn contain_stays_inside_and_centered() {
        for (iw, ih) in IMAGES {
            for (pw, ph) in PAGES {
                let p = fit_image(iw, ih, pw, ph, FitMode::Contain);
                assert!(p.width <= pw + EPS && p.height <= ph + EPS, "{p:?}");
                assert!(p.x >= -EPS && p.y >= -EPS, "{p:?}");
                assert_centered(p, pw, ph);
                // aspect ratio preserved
                assert!((p.width / p.height - iw / ih).abs() / (iw / ih) < EPS);
            }
        }
    }

    #[test]
    fn cover_covers_page_and_centered() {
        for (iw, ih) in IMAGES {
            for (pw, ph) in PAGES {
                let p = fit_image(iw, ih, pw, ph, FitMode::Cover);
                assert!(p.width >= pw - EPS && p.height >= ph - EPS, "{p:?}");
                assert_centered(p, pw, ph);
            }
        }
    }

    #[test]
    fn contain_wide_image_on_a4() {
        let p = fit_image(200.0, 100.0, 595.0, 842.0, FitMode::Contain);
        assert_eq!(p.width, 595.0);
        assert_eq!(p.height, 297.5);
        assert_eq!(p.x, 0.0);
        assert_eq!(p.y, (842.0 - 297.5) / 2.0);
    }

    #[test]
    fn cover_wide_image_on_a4() {
        let p = fit_image(200.0, 100.0, 595.0, 842.0, FitMode::Cover);
        assert_eq!(p.height, 842.0);
        assert_eq!(p.width, 1684.0);
        assert_eq!(p.x, (595.0 - 1684.0) / 2.0);
        assert_eq!(p.y, 0.0);
    }

    #[test]
    fn equal_ratio_takes_height_branch() {
        let p = fit_image(300.0, 400.0, 600.0, 800.0, FitMode::Contain);
        assert_eq!(p, Placement::native(600.0, 800.0));
        let p = fit_image(300.0, 400.0, 600.0, 800.0, FitMode::Cover);
        assert_eq!((p.width, p.height), (600.0, 800.0));
    }
}
