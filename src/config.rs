// src/config.rs

use crate::physics::modulation::ModulationOptions;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_BOND_TOLERANCE: f64 = 0.45;

fn default_cells() -> i32 {
  1
}

fn default_tolerance() -> f64 {
  DEFAULT_BOND_TOLERANCE
}

fn default_log_level() -> String {
  "info".to_string()
}

// --- Main Config Struct ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
  /// Filter applied when none is given on the command line.
  #[serde(default)]
  pub default_filter: String,

  #[serde(default = "default_cells")]
  pub lattice_cells: i32,

  #[serde(default = "default_tolerance")]
  pub bond_tolerance: f64,

  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      default_filter: String::new(),
      lattice_cells: default_cells(),
      bond_tolerance: default_tolerance(),
      log_level: default_log_level(),
    }
  }
}

impl Config {
  /// Loads config from standard OS location (e.g., ~/.config/cview-mscif/settings.json)
  pub fn load() -> (Self, String) {
    let path = Self::get_path();
    if path.exists() {
      match File::open(&path) {
        Ok(file) => {
          let reader = BufReader::new(file);
          match serde_json::from_reader(reader) {
            Ok(cfg) => (cfg, format!("Config loaded from {:?}", path)),
            Err(e) => (Self::default(), format!("Error parsing config: {}", e)),
          }
        }
        Err(e) => (Self::default(), format!("Error opening config: {}", e)),
      }
    } else {
      (
        Self::default(),
        "No config found. Using defaults.".to_string(),
      )
    }
  }

  /// Saves config to standard OS location
  pub fn save(&self) -> String {
    let path = Self::get_path();
    if let Some(parent) = path.parent() {
      let _ = fs::create_dir_all(parent);
    }

    match File::create(&path) {
      Ok(file) => {
        let writer = BufWriter::new(file);
        match serde_json::to_writer_pretty(writer, self) {
          Ok(_) => format!("Config saved to {:?}", path),
          Err(e) => format!("Failed to save config: {}", e),
        }
      }
      Err(e) => format!("Could not create config file: {}", e),
    }
  }

  fn get_path() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("com", "example", "cview-mscif") {
      proj.config_dir().join("settings.json")
    } else {
      PathBuf::from("settings.json")
    }
  }

  pub fn level_filter(&self) -> log::LevelFilter {
    log::LevelFilter::from_str(&self.log_level).unwrap_or(log::LevelFilter::Info)
  }

  /// Reader options for `filter`, or for the configured default filter.
  /// Values the filter leaves unset come from this config.
  pub fn reader_options(&self, filter: Option<&str>) -> ReaderOptions {
    let filter = filter.unwrap_or(&self.default_filter);
    let mut opts = ReaderOptions::from_filter(filter);
    if !opts.has_key("BONDTOLERANCE=") {
      opts.bond_tolerance = self.bond_tolerance;
    }
    opts.default_cells = self.lattice_cells.max(1);
    opts
  }
}

// --- Filter options ---

/// Per-invocation reader switches parsed from a `;`-separated filter string
/// such as `"MOLECUL;CONF 2;MODAXES=xz"`. Keys are case-insensitive.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
  tokens: Vec<String>,
  pub no_symmetry: bool,
  pub no_special: bool,
  pub no_ideal: bool,
  pub molecular: bool,
  /// 1-based alternate-location configuration (`CONF n`).
  pub configuration: Option<usize>,
  pub modulation: ModulationOptions,
  /// 1-based models to keep (`MODEL=n,m`); empty keeps all.
  pub models: Vec<usize>,
  pub bond_tolerance: f64,
  /// `CELLS=n` when given explicitly.
  pub cells: Option<i32>,
  pub default_cells: i32,
  pub packed: bool,
  pub all: bool,
}

impl Default for ReaderOptions {
  fn default() -> Self {
    Self::from_filter("")
  }
}

impl ReaderOptions {
  pub fn from_filter(filter: &str) -> Self {
    let tokens: Vec<String> = filter
      .split(';')
      .map(|t| t.trim().to_string())
      .filter(|t| !t.is_empty())
      .collect();
    let mut opts = Self {
      tokens,
      no_symmetry: false,
      no_special: false,
      no_ideal: false,
      molecular: false,
      configuration: None,
      modulation: ModulationOptions::default(),
      models: Vec::new(),
      bond_tolerance: DEFAULT_BOND_TOLERANCE,
      cells: None,
      default_cells: 1,
      packed: false,
      all: false,
    };
    opts.no_symmetry = opts.has_key("NOSYM");
    opts.no_special = opts.has_key("NOSPECIAL");
    opts.no_ideal = opts.has_key("NOIDEAL");
    opts.molecular = opts.has_key("MOLECUL") && !opts.has_key("BIOMOLECULE");
    opts.configuration = opts
      .value("CONF ")
      .and_then(|v| v.trim().parse().ok())
      .filter(|n| *n > 0);
    opts.packed = opts.has_key("PACKED");
    opts.all = opts.tokens.iter().any(|t| t.eq_ignore_ascii_case("ALL"));
    opts.models = opts
      .value("MODEL=")
      .map(|v| v.split(',').filter_map(|n| n.trim().parse().ok()).collect())
      .unwrap_or_default();
    if let Some(v) = opts.value("BONDTOLERANCE=").and_then(|v| v.trim().parse().ok()) {
      opts.bond_tolerance = v;
    }
    opts.cells = opts
      .value("CELLS=")
      .and_then(|v| v.trim().parse().ok())
      .filter(|n: &i32| *n > 0);

    opts.modulation = ModulationOptions {
      average: opts.has_key("MODAVE"),
      axes: opts.value("MODAXES=").map(|v| v.to_lowercase()),
      types: opts.value("MODTYPE=").map(|v| v.to_uppercase()),
      cell: opts.value("MODCELL=").map(str::to_string),
      selected: opts.value("MOD=").and_then(|v| v.trim().parse().ok()),
      last: opts.has_key("MODLAST"),
      no_pack: opts.has_key("MODNOPACK"),
      t: opts.value("MODT=").and_then(|v| v.trim().parse().ok()),
    };
    opts
  }

  /// True if some filter token starts with `key` (case-insensitive).
  pub fn has_key(&self, key: &str) -> bool {
    self.tokens.iter().any(|t| starts_with_ignore_case(t, key))
  }

  /// Text after `key` in the first token that starts with it.
  fn value(&self, key: &str) -> Option<&str> {
    self
      .tokens
      .iter()
      .find(|t| starts_with_ignore_case(t, key))
      .map(|t| t[key.len()..].trim())
  }

  pub fn lattice_cells(&self) -> i32 {
    self.cells.unwrap_or(self.default_cells)
  }

  pub fn wants_model(&self, n: usize) -> bool {
    self.models.is_empty() || self.models.contains(&n)
  }

  pub fn last_model(&self) -> Option<usize> {
    self.models.iter().max().copied()
  }
}

fn starts_with_ignore_case(text: &str, key: &str) -> bool {
  text.len() >= key.len()
    && text.is_char_boundary(key.len())
    && text[..key.len()].eq_ignore_ascii_case(key)
}
