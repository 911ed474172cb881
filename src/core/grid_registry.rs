use crate::core::projector::project_lonlat;
use crate::types::{is_geographic_proj4, GridDefinition, RemapError, RemapResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Static grid definitions, resolved by name
///
/// The registry is populated before processing starts and only read
/// afterwards; nothing resolves grids dynamically from swath extents.
#[derive(Debug, Clone, Default)]
pub struct GridRegistry {
    grids: BTreeMap<String, GridDefinition>,
}

impl GridRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the grids shipped with the crate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for grid in builtin_grids() {
            registry.register(grid);
        }
        registry
    }

    /// Built-in grids plus every grid found in `paths`, in order
    pub fn with_config_files<P: AsRef<Path>>(paths: &[P]) -> RemapResult<Self> {
        let mut registry = Self::builtin();
        for path in paths {
            registry.load_file(path)?;
        }
        Ok(registry)
    }

    /// Add or replace a grid definition
    pub fn register(&mut self, grid: GridDefinition) {
        if let Some(previous) = self.grids.insert(grid.grid_name.clone(), grid) {
            log::warn!("Grid '{}' was redefined", previous.grid_name);
        }
    }

    /// Look up a grid by name
    pub fn resolve(&self, grid_id: &str) -> RemapResult<&GridDefinition> {
        self.grids
            .get(grid_id)
            .ok_or_else(|| RemapError::UnknownGrid(grid_id.to_string()))
    }

    pub fn contains(&self, grid_id: &str) -> bool {
        self.grids.contains_key(grid_id)
    }

    pub fn grid_names(&self) -> Vec<&str> {
        self.grids.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    /// Load a grid configuration file
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> RemapResult<usize> {
        log::info!("Loading grid configuration: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        self.load_str(&text)
    }

    /// Parse grid configuration text and register every grid in it
    ///
    /// One grid per line:
    /// `name, proj4, <proj4 string>, cols, rows, dx, dy, x0, y0`.
    /// Blank lines and lines starting with `#` are ignored. On projected
    /// grids `x0`/`y0` may be given in degrees with a `deg` suffix.
    pub fn load_str(&mut self, text: &str) -> RemapResult<usize> {
        let mut loaded = 0;
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let grid = parse_grid_line(line)
                .map_err(|e| RemapError::Config(format!("line {}: {}", line_no + 1, e)))?;
            log::debug!("Registered grid '{}' ({}x{})", grid.grid_name, grid.rows, grid.cols);
            self.register(grid);
            loaded += 1;
        }
        Ok(loaded)
    }
}

fn parse_grid_line(line: &str) -> RemapResult<GridDefinition> {
    // The PROJ.4 string may itself hold commas (`+towgs84=0,0,0`): name and
    // type come off the front, the six numeric fields off the back
    let mut head = line.splitn(3, ',');
    let mut fields: Vec<&str> = head.by_ref().take(2).collect();
    let rest = head.next().unwrap_or_default();
    let mut tail: Vec<&str> = rest.rsplitn(7, ',').collect();
    tail.reverse();
    fields.extend(tail);
    let fields: Vec<&str> = fields.into_iter().map(str::trim).collect();
    if fields.len() != 9 || fields[2].is_empty() {
        return Err(RemapError::Config(format!(
            "expected 9 comma-separated fields, found {}",
            fields.len()
        )));
    }

    let grid_name = fields[0];
    if fields[1] != "proj4" {
        return Err(RemapError::Config(format!(
            "grid '{}': unsupported grid type '{}'",
            grid_name, fields[1]
        )));
    }
    let proj4 = fields[2];

    if fields[3..].iter().any(|f| f.eq_ignore_ascii_case("none")) {
        return Err(RemapError::Config(format!(
            "grid '{}': dynamic grids are not supported",
            grid_name
        )));
    }

    let cols = parse_count(grid_name, "cols", fields[3])?;
    let rows = parse_count(grid_name, "rows", fields[4])?;
    let dx = parse_number(grid_name, "dx", fields[5])?;
    let dy = parse_number(grid_name, "dy", fields[6])?;

    let x_deg = fields[7].strip_suffix("deg");
    let y_deg = fields[8].strip_suffix("deg");
    let (x0, y0) = match (x_deg, y_deg) {
        (Some(lon), Some(lat)) => {
            let lon = parse_number(grid_name, "x0", lon)?;
            let lat = parse_number(grid_name, "y0", lat)?;
            if is_geographic_proj4(proj4) {
                (lon, lat)
            } else {
                project_lonlat(proj4, lon, lat)?
            }
        }
        (None, None) => (
            parse_number(grid_name, "x0", fields[7])?,
            parse_number(grid_name, "y0", fields[8])?,
        ),
        _ => {
            return Err(RemapError::Config(format!(
                "grid '{}': x0 and y0 must both be in degrees or both projected",
                grid_name
            )))
        }
    };

    GridDefinition::new(grid_name, proj4, x0, y0, dx, dy, rows, cols)
}

fn parse_number(grid_name: &str, field: &str, value: &str) -> RemapResult<f64> {
    value.trim().parse::<f64>().map_err(|_| {
        RemapError::Config(format!("grid '{}': invalid {} '{}'", grid_name, field, value))
    })
}

fn parse_count(grid_name: &str, field: &str, value: &str) -> RemapResult<usize> {
    value.trim().parse::<usize>().map_err(|_| {
        RemapError::Config(format!("grid '{}': invalid {} '{}'", grid_name, field, value))
    })
}

fn builtin_grids() -> Vec<GridDefinition> {
    vec![
        GridDefinition {
            grid_name: "wgs84_global_0p25".to_string(),
            proj4_definition: "+proj=latlong +ellps=WGS84 +no_defs".to_string(),
            x0: -179.875,
            y0: 89.875,
            dx: 0.25,
            dy: -0.25,
            rows: 720,
            cols: 1440,
        },
        GridDefinition {
            grid_name: "lcc_conus_1km".to_string(),
            proj4_definition: "+proj=lcc +ellps=WGS84 +lat_0=25 +lat_1=25 +lon_0=-95 +units=m +no_defs"
                .to_string(),
            x0: -2_499_500.0,
            y0: 3_499_500.0,
            dx: 1000.0,
            dy: -1000.0,
            rows: 3500,
            cols: 5000,
        },
        GridDefinition {
            grid_name: "polar_north_1km".to_string(),
            proj4_definition:
                "+proj=stere +ellps=WGS84 +lat_0=90 +lat_ts=60 +lon_0=-150 +units=m +no_defs"
                    .to_string(),
            x0: -3_999_500.0,
            y0: 3_999_500.0,
            dx: 1000.0,
            dy: -1000.0,
            rows: 8000,
            cols: 8000,
        },
        GridDefinition {
            grid_name: "polar_south_1km".to_string(),
            proj4_definition:
                "+proj=stere +ellps=WGS84 +lat_0=-90 +lat_ts=-60 +lon_0=0 +units=m +no_defs"
                    .to_string(),
            x0: -3_999_500.0,
            y0: 3_999_500.0,
            dx: 1000.0,
            dy: -1000.0,
            rows: 8000,
            cols: 8000,
        },
        GridDefinition {
            grid_name: "merc_equator_2km".to_string(),
            proj4_definition: "+proj=merc +ellps=WGS84 +lon_0=0 +units=m +no_defs".to_string(),
            x0: -20_036_000.0,
            y0: 3_999_000.0,
            dx: 2000.0,
            dy: -2000.0,
            rows: 4000,
            cols: 20036,
        },
    ]
}
