//! Panels whose shift registers cover the pixels in an order other than
//! plain rows.
//!
//! All of these panels are "stretched": they are driven as if they were
//! twice as wide and half as high as they look.

use crate::error::Hub75Error;
use crate::pixel_mapper::MultiplexMapper;
use crate::pixel_mapper::PixelMapper;

const STRETCH_FACTOR: usize = 2;

/// Names in `multiplexing` option order, starting at 1.
pub const MULTIPLEXER_NAMES: [&str; 4] = ["Stripe", "Checkered", "Spiral", "ZStripe"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MultiplexScheme {
    Stripe,
    Checkered,
    Spiral,
    ZStripe,
}

impl MultiplexScheme {
    fn name(self) -> &'static str {
        MULTIPLEXER_NAMES[self as usize]
    }

    /// Position of (`x`, `y`) of one visible panel inside the stretched
    /// panel.
    fn map_single_panel(
        self,
        panel_cols: usize,
        panel_rows: usize,
        x: usize,
        y: usize,
    ) -> (usize, usize) {
        let half_rows = panel_rows / 2;
        let quarter_rows = panel_rows / 4;
        let top_stripe = y % half_rows < quarter_rows;
        let stripe_y = (y / half_rows) * quarter_rows + y % quarter_rows;
        match self {
            MultiplexScheme::Stripe => (if top_stripe { x + panel_cols } else { x }, stripe_y),
            MultiplexScheme::Checkered => {
                let left = x < panel_cols / 2;
                let logical_x = match (top_stripe, left) {
                    (true, true) => x + panel_cols / 2,
                    (true, false) => x + panel_cols,
                    (false, true) => x,
                    (false, false) => x + panel_cols / 2,
                };
                (logical_x, stripe_y)
            }
            MultiplexScheme::Spiral => {
                let panel_quarter = panel_cols / 4;
                let quarter = x / panel_quarter;
                let offset = x % panel_quarter;
                let logical_x = 2 * quarter * panel_quarter
                    + if top_stripe {
                        panel_quarter - 1 - offset
                    } else {
                        panel_quarter + offset
                    };
                (logical_x, stripe_y)
            }
            MultiplexScheme::ZStripe => {
                let x_offset = 8 * (x / 8);
                let y_offset = (y % 8) / 4;
                (x + 8 * y_offset + x_offset, (y % 4) + 4 * (y / 8))
            }
        }
    }
}

/// A [`MultiplexMapper`] for one of the known [`MultiplexScheme`]s.
#[derive(Clone, Copy, Debug)]
pub struct Multiplexer {
    scheme: MultiplexScheme,
    panel_cols: usize,
    panel_rows: usize,
}

impl Multiplexer {
    pub fn new(scheme: MultiplexScheme) -> Self {
        Self {
            scheme,
            panel_cols: 0,
            panel_rows: 0,
        }
    }

    pub fn scheme(&self) -> MultiplexScheme {
        self.scheme
    }
}

impl PixelMapper for Multiplexer {
    fn name(&self) -> &str {
        self.scheme.name()
    }

    fn size_mapping(
        &self,
        matrix_width: usize,
        matrix_height: usize,
    ) -> Result<(usize, usize), Hub75Error> {
        if self.panel_cols == 0 || self.panel_rows < 4 {
            return Err(Hub75Error::mapper(self.name(), "panel geometry has not been set up"));
        }
        Ok((matrix_width / STRETCH_FACTOR, matrix_height * STRETCH_FACTOR))
    }

    fn map_visible_to_matrix(
        &self,
        _matrix_width: usize,
        _matrix_height: usize,
        x: usize,
        y: usize,
    ) -> Option<(usize, usize)> {
        let chained_panel = x / self.panel_cols;
        let parallel_panel = y / self.panel_rows;
        let (new_x, new_y) = self.scheme.map_single_panel(
            self.panel_cols,
            self.panel_rows,
            x % self.panel_cols,
            y % self.panel_rows,
        );
        Some((
            chained_panel * STRETCH_FACTOR * self.panel_cols + new_x,
            parallel_panel * self.panel_rows / STRETCH_FACTOR + new_y,
        ))
    }
}

impl MultiplexMapper for Multiplexer {
    fn edit_cols_rows(&mut self, cols: &mut usize, rows: &mut usize) {
        self.panel_rows = *rows;
        self.panel_cols = *cols;
        *rows /= STRETCH_FACTOR;
        *cols *= STRETCH_FACTOR;
    }
}

/// All multiplexers, in `multiplexing` option order.
pub fn multiplex_mappers() -> Vec<Multiplexer> {
    [
        MultiplexScheme::Stripe,
        MultiplexScheme::Checkered,
        MultiplexScheme::Spiral,
        MultiplexScheme::ZStripe,
    ]
    .into_iter()
    .map(Multiplexer::new)
    .collect()
}

/// Multiplexer for the 1-based `multiplexing` option, `None` for 0.
pub fn multiplex_mapper(index: usize) -> Result<Option<Multiplexer>, Hub75Error> {
    if index == 0 {
        return Ok(None);
    }
    multiplex_mappers()
        .into_iter()
        .nth(index - 1)
        .map(Some)
        .ok_or_else(|| Hub75Error::InvalidOptions {
            message: format!("no multiplexer number {index}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stretched(scheme: MultiplexScheme) -> Multiplexer {
        let mut mapper = Multiplexer::new(scheme);
        let (mut cols, mut rows) = (32, 16);
        mapper.edit_cols_rows(&mut cols, &mut rows);
        assert_eq!((cols, rows), (64, 8));
        mapper
    }

    #[test]
    fn indices_follow_option_order() {
        assert!(multiplex_mapper(0).unwrap().is_none());
        assert_eq!(multiplex_mapper(3).unwrap().unwrap().name(), "Spiral");
        assert!(multiplex_mapper(5).is_err());
    }

    #[test]
    fn stripe_top_quarter_goes_right() {
        let mapper = stretched(MultiplexScheme::Stripe);
        assert_eq!(mapper.size_mapping(64, 8).unwrap(), (32, 16));
        assert_eq!(mapper.map_visible_to_matrix(64, 8, 0, 0), Some((32, 0)));
        assert_eq!(mapper.map_visible_to_matrix(64, 8, 0, 4), Some((0, 0)));
        assert_eq!(mapper.map_visible_to_matrix(64, 8, 1, 9), Some((33, 5)));
    }

    #[test]
    fn checkered_quadrants() {
        let mapper = stretched(MultiplexScheme::Checkered);
        assert_eq!(mapper.map_visible_to_matrix(64, 8, 0, 0), Some((16, 0)));
        assert_eq!(mapper.map_visible_to_matrix(64, 8, 20, 0), Some((52, 0)));
        assert_eq!(mapper.map_visible_to_matrix(64, 8, 20, 4), Some((36, 0)));
    }

    #[test]
    fn spiral_reverses_top_stripe() {
        let mapper = stretched(MultiplexScheme::Spiral);
        assert_eq!(mapper.map_visible_to_matrix(64, 8, 0, 0), Some((7, 0)));
        assert_eq!(mapper.map_visible_to_matrix(64, 8, 0, 4), Some((8, 0)));
    }

    #[test]
    fn every_multiplexer_is_a_bijection() {
        for mut mapper in multiplex_mappers() {
            let (mut cols, mut rows) = (32, 16);
            mapper.edit_cols_rows(&mut cols, &mut rows);
            let (width, height) = (cols * 2, rows);
            let (visible_width, visible_height) = mapper.size_mapping(width, height).unwrap();
            let mut seen = vec![false; width * height];
            for y in 0..visible_height {
                for x in 0..visible_width {
                    let (mx, my) = mapper.map_visible_to_matrix(width, height, x, y).unwrap();
                    assert!(mx < width && my < height, "{} maps out of range", mapper.name());
                    let name = mapper.name();
                    assert!(!seen[my * width + mx], "{name} maps twice onto ({mx}, {my})");
                    seen[my * width + mx] = true;
                }
            }
        }
    }
}
