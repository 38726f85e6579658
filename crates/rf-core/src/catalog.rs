//! Format catalog: platform identifiers mapped to their named output specs.
//!
//! The catalog is pure data. It is built once at startup, either from the
//! built-in table below or from the `catalog` section of the config file,
//! and is never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::media::Dimensions;

/// One output target: a named format on a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    pub platform: String,
    pub name: String,
    pub dimensions: Dimensions,
    /// Display label such as `"16:9"`.
    pub aspect_ratio: String,
}

impl FormatSpec {
    pub fn new(platform: &str, name: &str, width: u32, height: u32, aspect_ratio: &str) -> Self {
        Self {
            platform: platform.to_string(),
            name: name.to_string(),
            dimensions: Dimensions::new(width, height),
            aspect_ratio: aspect_ratio.to_string(),
        }
    }

    /// File stem used for this format's artifact, e.g. `instagram_square`.
    pub fn file_stem(&self) -> String {
        let slug = |s: &str| {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
                .collect::<String>()
        };
        format!("{}_{}", slug(&self.platform), slug(&self.name))
    }
}

const BUILTIN: &[(&str, &str, u32, u32, &str)] = &[
    ("instagram", "Square", 1080, 1080, "1:1"),
    ("instagram", "Portrait", 1080, 1350, "4:5"),
    ("instagram", "Landscape", 1080, 566, "1.91:1"),
    ("instagram", "Story", 1080, 1920, "9:16"),
    ("instagram", "Reel", 1080, 1920, "9:16"),
    ("facebook", "Post", 1200, 630, "1.91:1"),
    ("facebook", "Square", 1080, 1080, "1:1"),
    ("facebook", "Story", 1080, 1920, "9:16"),
    ("facebook", "Cover", 820, 312, "2.63:1"),
    ("twitter", "Post", 1600, 900, "16:9"),
    ("twitter", "Square", 1080, 1080, "1:1"),
    ("twitter", "Header", 1500, 500, "3:1"),
    ("linkedin", "Post", 1200, 627, "1.91:1"),
    ("linkedin", "Square", 1080, 1080, "1:1"),
    ("linkedin", "Cover", 1584, 396, "4:1"),
    ("youtube", "Thumbnail", 1280, 720, "16:9"),
    ("youtube", "1080p", 1920, 1080, "16:9"),
    ("youtube", "Shorts", 1080, 1920, "9:16"),
    ("youtube", "Banner", 2560, 1440, "16:9"),
    ("tiktok", "Video", 1080, 1920, "9:16"),
    ("pinterest", "Pin", 1000, 1500, "2:3"),
    ("pinterest", "Square", 1000, 1000, "1:1"),
];

/// Static lookup table of [`FormatSpec`] entries, ordered per platform.
#[derive(Debug, Clone)]
pub struct FormatCatalog {
    specs: Vec<FormatSpec>,
}

impl FormatCatalog {
    /// The catalog shipped with the binary.
    pub fn builtin() -> Self {
        let specs = BUILTIN
            .iter()
            .map(|(p, n, w, h, r)| FormatSpec::new(p, n, *w, *h, r))
            .collect();
        Self { specs }
    }

    /// Build a catalog from configured entries.
    ///
    /// Rejects duplicates and zero-sized targets.
    pub fn from_specs(specs: Vec<FormatSpec>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for spec in &specs {
            if spec.dimensions.is_empty() {
                return Err(Error::Validation(format!(
                    "format {}/{} has empty dimensions",
                    spec.platform, spec.name
                )));
            }
            let key = (spec.platform.to_ascii_lowercase(), spec.name.to_ascii_lowercase());
            if !seen.insert(key) {
                return Err(Error::Validation(format!(
                    "duplicate format {}/{}",
                    spec.platform, spec.name
                )));
            }
        }
        Ok(Self { specs })
    }

    /// Look up a format. Platform and name match case-insensitively.
    pub fn get(&self, platform: &str, name: &str) -> Option<&FormatSpec> {
        self.specs.iter().find(|s| {
            s.platform.eq_ignore_ascii_case(platform) && s.name.eq_ignore_ascii_case(name)
        })
    }

    pub fn has_platform(&self, platform: &str) -> bool {
        self.specs
            .iter()
            .any(|s| s.platform.eq_ignore_ascii_case(platform))
    }

    /// Formats of one platform in catalog order.
    pub fn for_platform(&self, platform: &str) -> Vec<&FormatSpec> {
        self.specs
            .iter()
            .filter(|s| s.platform.eq_ignore_ascii_case(platform))
            .collect()
    }

    /// All entries grouped by platform.
    pub fn grouped(&self) -> BTreeMap<String, Vec<FormatSpec>> {
        let mut map: BTreeMap<String, Vec<FormatSpec>> = BTreeMap::new();
        for spec in &self.specs {
            map.entry(spec.platform.clone()).or_default().push(spec.clone());
        }
        map
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormatSpec> {
        self.specs.iter()
    }
}

impl Default for FormatCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
