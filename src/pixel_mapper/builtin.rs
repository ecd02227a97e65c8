use crate::error::Hub75Error;
use crate::pixel_mapper::PixelMapper;

/// Rotation clockwise by a multiple of 90 degrees.
#[derive(Clone, Copy, Debug, Default)]
pub struct RotateMapper {
    angle: u32,
}

impl PixelMapper for RotateMapper {
    fn name(&self) -> &str {
        "Rotate"
    }

    fn set_parameters(
        &mut self,
        _chain: usize,
        _parallel: usize,
        param: &str,
    ) -> Result<(), Hub75Error> {
        if param.is_empty() {
            self.angle = 0;
            return Ok(());
        }
        let angle: i32 = param
            .parse()
            .map_err(|_| Hub75Error::mapper(self.name(), format!("invalid angle '{param}'")))?;
        if angle % 90 != 0 {
            return Err(Hub75Error::mapper(
                self.name(),
                "rotation needs to be a multiple of 90 degrees",
            ));
        }
        self.angle = angle.rem_euclid(360) as u32;
        Ok(())
    }

    fn size_mapping(
        &self,
        matrix_width: usize,
        matrix_height: usize,
    ) -> Result<(usize, usize), Hub75Error> {
        if self.angle % 180 == 0 {
            Ok((matrix_width, matrix_height))
        } else {
            Ok((matrix_height, matrix_width))
        }
    }

    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> Option<(usize, usize)> {
        Some(match self.angle {
            90 => (matrix_width - y - 1, x),
            180 => (matrix_width - x - 1, matrix_height - y - 1),
            270 => (y, matrix_height - x - 1),
            _ => (x, y),
        })
    }
}

/// Horizontal (`H`, the default) or vertical (`V`) mirroring.
#[derive(Clone, Copy, Debug)]
pub struct MirrorMapper {
    horizontal: bool,
}

impl Default for MirrorMapper {
    fn default() -> Self {
        Self { horizontal: true }
    }
}

impl PixelMapper for MirrorMapper {
    fn name(&self) -> &str {
        "Mirror"
    }

    fn set_parameters(
        &mut self,
        _chain: usize,
        _parallel: usize,
        param: &str,
    ) -> Result<(), Hub75Error> {
        self.horizontal = match param {
            "" | "H" | "h" => true,
            "V" | "v" => false,
            _ => {
                return Err(Hub75Error::mapper(
                    self.name(),
                    format!("parameter '{param}' should be either 'V' or 'H'"),
                ))
            }
        };
        Ok(())
    }

    fn size_mapping(
        &self,
        matrix_width: usize,
        matrix_height: usize,
    ) -> Result<(usize, usize), Hub75Error> {
        Ok((matrix_width, matrix_height))
    }

    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> Option<(usize, usize)> {
        if self.horizontal {
            Some((matrix_width - 1 - x, y))
        } else {
            Some((x, matrix_height - 1 - y))
        }
    }
}

/// Folds a long chain in half: after half the panels the chain turns around
/// and continues below, doubling the height.
///
/// ```text
///   [<][<][<][<] }- Pi connector      [<][<] }- Pi connector
///                                     [>][>]
/// ```
#[derive(Clone, Copy, Debug)]
pub struct UArrangementMapper {
    parallel: usize,
}

impl Default for UArrangementMapper {
    fn default() -> Self {
        Self { parallel: 1 }
    }
}

impl PixelMapper for UArrangementMapper {
    fn name(&self) -> &str {
        "U-mapper"
    }

    fn set_parameters(
        &mut self,
        chain: usize,
        parallel: usize,
        _param: &str,
    ) -> Result<(), Hub75Error> {
        if chain < 2 {
            return Err(Hub75Error::mapper(self.name(), "needs a chain of at least 2 panels"));
        }
        if chain % 2 != 0 {
            return Err(Hub75Error::mapper(
                self.name(),
                "chain length needs to be divisible by two",
            ));
        }
        self.parallel = parallel.max(1);
        Ok(())
    }

    fn size_mapping(
        &self,
        matrix_width: usize,
        matrix_height: usize,
    ) -> Result<(usize, usize), Hub75Error> {
        if matrix_height % self.parallel != 0 {
            return Err(Hub75Error::mapper(
                self.name(),
                format!(
                    "height {matrix_height} is not divisible by parallel {}",
                    self.parallel
                ),
            ));
        }
        Ok(((matrix_width / 64) * 32, 2 * matrix_height))
    }

    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> Option<(usize, usize)> {
        let panel_height = matrix_height / self.parallel;
        let visible_width = (matrix_width / 64) * 32;
        let slab_height = 2 * panel_height;
        let base_y = (y / slab_height) * panel_height;
        let y = y % slab_height;
        if y < panel_height {
            Some((x + matrix_width / 2, base_y + y))
        } else {
            Some((visible_width - x - 1, base_y + slab_height - y - 1))
        }
    }
}

/// Stacks the panels of a chain on top of each other, reversing every other
/// one.
///
/// ```text
///   [<][<] }- Pi connector
///   [>][>]
///   [<][<]
/// ```
#[derive(Clone, Copy, Debug)]
pub struct SArrangementMapper {
    chain: usize,
    parallel: usize,
}

impl Default for SArrangementMapper {
    fn default() -> Self {
        Self { chain: 1, parallel: 1 }
    }
}

impl PixelMapper for SArrangementMapper {
    fn name(&self) -> &str {
        "S-mapper"
    }

    fn set_parameters(
        &mut self,
        chain: usize,
        parallel: usize,
        _param: &str,
    ) -> Result<(), Hub75Error> {
        self.chain = chain.max(1);
        self.parallel = parallel.max(1);
        Ok(())
    }

    fn size_mapping(
        &self,
        matrix_width: usize,
        matrix_height: usize,
    ) -> Result<(usize, usize), Hub75Error> {
        Ok((matrix_width / self.chain, (matrix_height / self.parallel) * self.chain))
    }

    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> Option<(usize, usize)> {
        let visible_width = matrix_width / self.chain;
        let panel_height = matrix_height / self.parallel;
        let panel = y / panel_height;
        let within = y % panel_height;
        if panel % 2 == 1 {
            Some((panel * visible_width + visible_width - 1 - x, panel_height - 1 - within))
        } else {
            Some((panel * visible_width + x, within))
        }
    }
}

/// Orientation of one panel inside a [`RemapMapper`] canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Orientation {
    North,
    East,
    South,
    West,
    Unused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Tile {
    x: usize,
    y: usize,
    orientation: Orientation,
}

/// Free placement of every panel on the visible canvas.
///
/// Parameter: `<W>,<H>|<x>,<y><o>|<x>,<y><o>|...`, the canvas size followed
/// by one entry per physical panel in chain order (all panels of the first
/// parallel chain, then the next chain). `<o>` is the panel's rotation:
/// `n` (upright), `e` (90 degrees clockwise), `s` (upside down), `w` (90
/// degrees counter-clockwise) or `x` (not shown).
#[derive(Clone, Debug, Default)]
pub struct RemapMapper {
    chain: usize,
    parallel: usize,
    width: usize,
    height: usize,
    tiles: Vec<Tile>,
}

impl RemapMapper {
    fn parse_pair(&self, text: &str) -> Result<(usize, usize), Hub75Error> {
        let invalid = || {
            Hub75Error::mapper(self.name(), format!("expected '<x>,<y>', got '{text}'"))
        };
        let (x, y) = text.split_once(',').ok_or_else(invalid)?;
        let x = x.trim().parse().map_err(|_| invalid())?;
        let y = y.trim().parse().map_err(|_| invalid())?;
        Ok((x, y))
    }

    fn parse_tile(&self, text: &str) -> Result<Tile, Hub75Error> {
        let text = text.trim();
        let orientation = match text.chars().last() {
            Some('n' | 'N') => Orientation::North,
            Some('e' | 'E') => Orientation::East,
            Some('s' | 'S') => Orientation::South,
            Some('w' | 'W') => Orientation::West,
            Some('x' | 'X') => Orientation::Unused,
            _ => {
                return Err(Hub75Error::mapper(
                    self.name(),
                    format!("panel '{text}' needs an orientation of n, e, s, w or x"),
                ))
            }
        };
        let (x, y) = self.parse_pair(&text[..text.len() - 1])?;
        Ok(Tile { x, y, orientation })
    }

    /// Visible footprint of a tile.
    fn extent(tile: &Tile, panel_width: usize, panel_height: usize) -> (usize, usize) {
        match tile.orientation {
            Orientation::East | Orientation::West => (panel_height, panel_width),
            _ => (panel_width, panel_height),
        }
    }
}

impl PixelMapper for RemapMapper {
    fn name(&self) -> &str {
        "Remap"
    }

    fn set_parameters(
        &mut self,
        chain: usize,
        parallel: usize,
        param: &str,
    ) -> Result<(), Hub75Error> {
        self.chain = chain.max(1);
        self.parallel = parallel.max(1);
        let mut parts = param.split('|');
        let size = parts.next().unwrap_or_default();
        let (width, height) = self.parse_pair(size)?;
        if width == 0 || height == 0 {
            return Err(Hub75Error::mapper(self.name(), "canvas size must not be zero"));
        }
        self.width = width;
        self.height = height;
        self.tiles = parts.map(|part| self.parse_tile(part)).collect::<Result<_, _>>()?;
        if self.tiles.len() != self.chain * self.parallel {
            return Err(Hub75Error::mapper(
                self.name(),
                format!(
                    "expected {} panels, got {}",
                    self.chain * self.parallel,
                    self.tiles.len()
                ),
            ));
        }
        Ok(())
    }

    fn size_mapping(
        &self,
        matrix_width: usize,
        matrix_height: usize,
    ) -> Result<(usize, usize), Hub75Error> {
        let panel_width = matrix_width / self.chain;
        let panel_height = matrix_height / self.parallel;
        let mut covered = vec![false; self.width * self.height];
        for (index, tile) in self.tiles.iter().enumerate() {
            if tile.orientation == Orientation::Unused {
                continue;
            }
            let (w, h) = Self::extent(tile, panel_width, panel_height);
            if tile.x + w > self.width || tile.y + h > self.height {
                return Err(Hub75Error::mapper(
                    self.name(),
                    format!("panel {index} does not fit into {}x{}", self.width, self.height),
                ));
            }
            for y in tile.y..tile.y + h {
                for x in tile.x..tile.x + w {
                    let cell = &mut covered[y * self.width + x];
                    if *cell {
                        return Err(Hub75Error::mapper(
                            self.name(),
                            format!("panel {index} overlaps another panel at ({x}, {y})"),
                        ));
                    }
                    *cell = true;
                }
            }
        }
        Ok((self.width, self.height))
    }

    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> Option<(usize, usize)> {
        let panel_width = matrix_width / self.chain;
        let panel_height = matrix_height / self.parallel;
        self.tiles.iter().enumerate().find_map(|(index, tile)| {
            if tile.orientation == Orientation::Unused {
                return None;
            }
            let (w, h) = Self::extent(tile, panel_width, panel_height);
            if x < tile.x || y < tile.y || x >= tile.x + w || y >= tile.y + h {
                return None;
            }
            let (lx, ly) = (x - tile.x, y - tile.y);
            let (px, py) = match tile.orientation {
                Orientation::South => (panel_width - 1 - lx, panel_height - 1 - ly),
                Orientation::East => (ly, panel_height - 1 - lx),
                Orientation::West => (panel_width - 1 - ly, lx),
                _ => (lx, ly),
            };
            let column = index % self.chain;
            let row = index / self.chain;
            Some((column * panel_width + px, row * panel_height + py))
        })
    }
}
