//! Coordinate transforms between the canvas an application draws on and the
//! pixels as the panels are wired.
//!
//! Mappers are applied one after the other, the first in a configuration
//! string sees the raw panel layout. Each one reports the visible size it
//! produces and, for every visible pixel, which pixel of its input it is.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Hub75Error;

pub mod builtin;
pub mod multiplex;

/// A named visible-to-matrix transform.
pub trait PixelMapper: Send + Sync {
    /// Registry key, matched case-insensitively.
    fn name(&self) -> &str;

    /// Configure for the given panel arrangement and optional parameter
    /// string.
    fn set_parameters(
        &mut self,
        _chain: usize,
        _parallel: usize,
        _param: &str,
    ) -> Result<(), Hub75Error> {
        Ok(())
    }

    /// Visible size for a matrix of `matrix_width` x `matrix_height`.
    fn size_mapping(
        &self,
        matrix_width: usize,
        matrix_height: usize,
    ) -> Result<(usize, usize), Hub75Error>;

    /// Matrix pixel shown at visible position (`x`, `y`), `None` if that
    /// position is deliberately left dark.
    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> Option<(usize, usize)>;
}

/// Mapper for panels that scan their pixels in an unusual order. Applied
/// before any other mapper, and it may change the physical geometry the
/// refresh engine works with.
pub trait MultiplexMapper: PixelMapper {
    /// Rewrite the per-panel columns and rows into the layout the panel's
    /// shift registers actually have.
    fn edit_cols_rows(&mut self, cols: &mut usize, rows: &mut usize);
}

type MapperFactory = Box<dyn Fn() -> Box<dyn PixelMapper> + Send + Sync>;

/// Named mapper constructors.
pub struct PixelMapperRegistry {
    factories: BTreeMap<String, MapperFactory>,
}

impl PixelMapperRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Make a mapper available under its [`PixelMapper::name`]. A mapper
    /// registered under an existing name replaces it.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn PixelMapper> + Send + Sync + 'static,
    {
        let name = factory().name().to_ascii_lowercase();
        self.factories.insert(name, Box::new(factory));
    }

    /// Display names of all registered mappers.
    pub fn names(&self) -> Vec<String> {
        self.factories
            .values()
            .map(|factory| factory().name().to_string())
            .collect()
    }

    /// A configured instance of the mapper called `name`.
    pub fn find(
        &self,
        name: &str,
        chain: usize,
        parallel: usize,
        param: &str,
    ) -> Result<Box<dyn PixelMapper>, Hub75Error> {
        let factory = self
            .factories
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| Hub75Error::UnknownPixelMapper {
                name: name.to_string(),
            })?;
        let mut mapper = factory();
        mapper.set_parameters(chain, parallel, param)?;
        Ok(mapper)
    }

    /// Parse `name[:param][;name[:param]...]` into configured mappers, in
    /// the order they are to be applied.
    pub fn parse_config(
        &self,
        config: &str,
        chain: usize,
        parallel: usize,
    ) -> Result<Vec<Box<dyn PixelMapper>>, Hub75Error> {
        let mut mappers = Vec::new();
        for entry in config.split(';') {
            let (name, param) = entry.split_once(':').unwrap_or((entry, ""));
            let name = name.trim();
            if name.is_empty() {
                if !param.trim().is_empty() {
                    return Err(Hub75Error::UnknownPixelMapper {
                        name: format!(":{param}"),
                    });
                }
                continue;
            }
            mappers.push(self.find(name, chain, parallel, param.trim())?);
        }
        Ok(mappers)
    }
}

impl Default for PixelMapperRegistry {
    /// All built-in mappers.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(|| Box::new(builtin::RotateMapper::default()));
        registry.register(|| Box::new(builtin::MirrorMapper::default()));
        registry.register(|| Box::new(builtin::UArrangementMapper::default()));
        registry.register(|| Box::new(builtin::SArrangementMapper::default()));
        registry.register(|| Box::new(builtin::RemapMapper::default()));
        registry
    }
}

impl fmt::Debug for PixelMapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names() {
        let registry = PixelMapperRegistry::default();
        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["Mirror", "Remap", "Rotate", "S-mapper", "U-mapper"]);
    }

    #[test]
    fn config_is_parsed_in_order() {
        let registry = PixelMapperRegistry::default();
        let mappers = registry.parse_config("rotate:90; ;mirror:H;", 1, 1).unwrap();
        let names: Vec<&str> = mappers.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["Rotate", "Mirror"]);
    }

    #[test]
    fn unknown_and_stray_entries() {
        let registry = PixelMapperRegistry::default();
        assert!(matches!(
            registry.parse_config("Spin:90", 1, 1),
            Err(Hub75Error::UnknownPixelMapper { .. })
        ));
        assert!(registry.parse_config(":90", 1, 1).is_err());
        assert!(registry.parse_config("", 1, 1).unwrap().is_empty());
    }
}
