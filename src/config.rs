use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

const DEFAULT_CAPACITY_PER_CASCADE: u32 = 1 << 16;
const DEFAULT_CASCADE_COUNT: u32 = 4;
const DEFAULT_BASE_CELL_SIZE: f32 = 0.25;
const DEFAULT_CASCADE_BASE_DISTANCE: f32 = 8.0;
const DEFAULT_MAX_ACCUMULATED_SAMPLES: u32 = 32;
const DEFAULT_EVICT_THRESHOLD: u32 = 4;
const DEFAULT_STALE_THRESHOLD: u32 = 64;
const DEFAULT_RADIANCE_SCALE: f32 = 1024.0;
const DEFAULT_MAX_RADIANCE: f32 = 1.0;

/// Upper bound on cascades; cell sizes are `base * 2^level` in `f32`.
pub const MAX_CASCADE_COUNT: u32 = 16;

/// Construction parameters of a [`RadianceCache`](crate::RadianceCache).
///
/// Everything here shapes the table layout or the blend law, so a change
/// requires a full reset of the cache.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity_per_cascade: u32,
    pub cascade_count: u32,
    /// Edge length of a cascade-0 cell in world units.
    pub base_cell_size: f32,
    /// Distance from the reference point covered by each cascade band.
    pub cascade_base_distance: f32,
    /// Cap of the per-cell history counter; past it the resolve blend is a
    /// fixed-weight exponential average.
    pub max_accumulated_samples: u32,
    /// Time steps a colliding owner must stay quiet before it can be evicted.
    pub evict_threshold: u32,
    /// Time steps without a write after which a cell is released.
    pub stale_threshold: u32,
    /// Fixed-point factor applied to contributions before the integer merge.
    pub radiance_scale: f32,
    /// Per-channel ceiling applied before scaling. Raise it for HDR input.
    pub max_radiance: f32,
    /// Keep the direct/indirect split per cell for debug views.
    pub visualization: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_per_cascade: DEFAULT_CAPACITY_PER_CASCADE,
            cascade_count: DEFAULT_CASCADE_COUNT,
            base_cell_size: DEFAULT_BASE_CELL_SIZE,
            cascade_base_distance: DEFAULT_CASCADE_BASE_DISTANCE,
            max_accumulated_samples: DEFAULT_MAX_ACCUMULATED_SAMPLES,
            evict_threshold: DEFAULT_EVICT_THRESHOLD,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            radiance_scale: DEFAULT_RADIANCE_SCALE,
            max_radiance: DEFAULT_MAX_RADIANCE,
            visualization: false,
        }
    }
}

impl CacheConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|error| ConfigError::Io(format!("{}: {error}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|error| ConfigError::Parse(error.to_string()))
    }

    /// Entries in each per-cell array.
    pub fn total_capacity(&self) -> usize {
        self.capacity_per_cascade as usize * self.cascade_count as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity_per_cascade == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.cascade_count == 0 || self.cascade_count > MAX_CASCADE_COUNT {
            return Err(ConfigError::CascadeCount(self.cascade_count));
        }
        if self
            .capacity_per_cascade
            .checked_mul(self.cascade_count)
            .is_none()
        {
            return Err(ConfigError::CapacityOverflow {
                capacity_per_cascade: self.capacity_per_cascade,
                cascade_count: self.cascade_count,
            });
        }
        for (field, value) in [
            ("base_cell_size", self.base_cell_size),
            ("cascade_base_distance", self.cascade_base_distance),
            ("radiance_scale", self.radiance_scale),
            ("max_radiance", self.max_radiance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        for (field, value) in [
            ("max_accumulated_samples", self.max_accumulated_samples),
            ("evict_threshold", self.evict_threshold),
            ("stale_threshold", self.stale_threshold),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroThreshold(field));
            }
        }
        // An owner that reads as stale must also be evictable by a colliding
        // writer, otherwise the slot is released with that writer turned away.
        if self.stale_threshold < self.evict_threshold {
            return Err(ConfigError::StaleBeforeEviction {
                evict_threshold: self.evict_threshold,
                stale_threshold: self.stale_threshold,
            });
        }
        // A single scaled contribution must fit in 32 bits so the 64-bit
        // sums cannot overflow for any realistic sample count.
        if self.max_radiance * self.radiance_scale > u32::MAX as f32 {
            return Err(ConfigError::ScaleOverflow {
                radiance_scale: self.radiance_scale,
                max_radiance: self.max_radiance,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    ZeroCapacity,
    CascadeCount(u32),
    CapacityOverflow {
        capacity_per_cascade: u32,
        cascade_count: u32,
    },
    NonPositive {
        field: &'static str,
        value: f32,
    },
    ZeroThreshold(&'static str),
    StaleBeforeEviction {
        evict_threshold: u32,
        stale_threshold: u32,
    },
    ScaleOverflow {
        radiance_scale: f32,
        max_radiance: f32,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(message) => write!(f, "cache config io error: {message}"),
            Self::Parse(message) => write!(f, "cache config parse error: {message}"),
            Self::ZeroCapacity => write!(f, "capacity_per_cascade must be non-zero"),
            Self::CascadeCount(count) => write!(
                f,
                "cascade_count {count} outside 1..={MAX_CASCADE_COUNT}"
            ),
            Self::CapacityOverflow {
                capacity_per_cascade,
                cascade_count,
            } => write!(
                f,
                "{capacity_per_cascade} cells x {cascade_count} cascades overflows a 32-bit index"
            ),
            Self::NonPositive { field, value } => {
                write!(f, "{field} must be finite and positive, got {value}")
            }
            Self::ZeroThreshold(field) => write!(f, "{field} must be at least 1"),
            Self::StaleBeforeEviction {
                evict_threshold,
                stale_threshold,
            } => write!(
                f,
                "stale_threshold {stale_threshold} is below evict_threshold {evict_threshold}"
            ),
            Self::ScaleOverflow {
                radiance_scale,
                max_radiance,
            } => write!(
                f,
                "max_radiance {max_radiance} x radiance_scale {radiance_scale} exceeds 32-bit fixed point"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_capacity(), (1 << 16) * 4);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            CacheConfig::from_json_str(r#"{ "capacity_per_cascade": 16, "cascade_count": 1 }"#)
                .unwrap();
        assert_eq!(config.capacity_per_cascade, 16);
        assert_eq!(config.cascade_count, 1);
        assert_eq!(config.evict_threshold, 4);
        assert_eq!(config.max_accumulated_samples, 32);
    }

    #[test]
    fn json_round_trips_through_pretty_printer() {
        let config = CacheConfig {
            visualization: true,
            max_radiance: 16.0,
            ..CacheConfig::default()
        };
        let text = config.to_json_pretty().unwrap();
        assert_eq!(CacheConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn stale_threshold_may_not_undercut_eviction() {
        let config = CacheConfig {
            evict_threshold: 4,
            stale_threshold: 2,
            ..CacheConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::StaleBeforeEviction {
                evict_threshold: 4,
                stale_threshold: 2,
            })
        );
        assert!(matches!(
            CacheConfig::from_json_str(r#"{ "evict_threshold": 8, "stale_threshold": 7 }"#),
            Err(ConfigError::StaleBeforeEviction { .. })
        ));

        let equal = CacheConfig {
            evict_threshold: 4,
            stale_threshold: 4,
            ..CacheConfig::default()
        };
        assert!(equal.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_values() {
        let zero_capacity = CacheConfig {
            capacity_per_cascade: 0,
            ..CacheConfig::default()
        };
        assert_eq!(zero_capacity.validate(), Err(ConfigError::ZeroCapacity));

        let negative_cell = CacheConfig {
            base_cell_size: -1.0,
            ..CacheConfig::default()
        };
        assert!(matches!(
            negative_cell.validate(),
            Err(ConfigError::NonPositive {
                field: "base_cell_size",
                ..
            })
        ));

        let no_eviction = CacheConfig {
            evict_threshold: 0,
            ..CacheConfig::default()
        };
        assert_eq!(
            no_eviction.validate(),
            Err(ConfigError::ZeroThreshold("evict_threshold"))
        );

        let overflow = CacheConfig {
            max_radiance: 1.0e9,
            ..CacheConfig::default()
        };
        assert!(matches!(
            overflow.validate(),
            Err(ConfigError::ScaleOverflow { .. })
        ));
    }

    #[test]
    fn malformed_json_reports_parse_error() {
        let error = CacheConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
        assert!(error.to_string().starts_with("cache config parse error"));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let error = CacheConfig::load(Path::new("/nonexistent/radiance-cache.json")).unwrap_err();
        assert!(matches!(error, ConfigError::Io(_)));
    }
}
