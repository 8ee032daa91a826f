use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::error::ConfigError;
use crate::logger;

/// Logical names of everything the controller looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetName {
    RefreshControl,
    BookingOffer,
    WaitlistOffer,
    SoldOutBanner,
    ConnectionQueueBanner,
}

impl TargetName {
    pub const ALL: [TargetName; 5] = [
        TargetName::RefreshControl,
        TargetName::BookingOffer,
        TargetName::WaitlistOffer,
        TargetName::SoldOutBanner,
        TargetName::ConnectionQueueBanner,
    ];

    /// Targets without which a cycle can never make progress.
    pub const REQUIRED: [TargetName; 2] = [TargetName::RefreshControl, TargetName::BookingOffer];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetName::RefreshControl => "refresh-control",
            TargetName::BookingOffer => "booking-offer",
            TargetName::WaitlistOffer => "waitlist-offer",
            TargetName::SoldOutBanner => "sold-out-banner",
            TargetName::ConnectionQueueBanner => "connection-queue-banner",
        }
    }

    /// Template file stems accepted for this target.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            TargetName::RefreshControl => &["refresh-control", "refresh", "조회하기"],
            TargetName::BookingOffer => &["booking-offer", "booking", "예약하기"],
            TargetName::WaitlistOffer => &["waitlist-offer", "waitlist", "예약대기", "신청하기"],
            TargetName::SoldOutBanner => &["sold-out-banner", "sold-out", "매진"],
            TargetName::ConnectionQueueBanner => {
                &["connection-queue-banner", "connection-wait", "접속대기"]
            }
        }
    }

    pub fn parse(s: &str) -> Option<TargetName> {
        TargetName::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque payload telling a backend how to find a target.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    Template(PathBuf),
    Css(String),
    XPath(String),
}

impl Locator {
    /// `xpath:` prefix selects XPath, anything else is CSS.
    pub fn from_selector(raw: &str) -> Locator {
        match raw.strip_prefix("xpath:") {
            Some(expr) => Locator::XPath(expr.trim().to_string()),
            None => Locator::Css(raw.trim().to_string()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Template(p) => write!(f, "template {}", p.display()),
            Locator::Css(s) => write!(f, "css {}", s),
            Locator::XPath(s) => write!(f, "xpath {}", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub name: TargetName,
    pub locator: Locator,
    pub min_confidence: Option<f64>,
}

/// Resolved targets, read-only after startup.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    specs: HashMap<TargetName, TargetSpec>,
}

fn normalize_stem(s: &str) -> String {
    s.trim().to_lowercase()
}

impl TargetSet {
    /// Resolve image templates in `dir` by file stem. Only `.png` files
    /// are considered, first match in sorted order wins.
    pub fn from_template_dir(dir: &Path, floors: &BTreeMap<String, f64>) -> Result<Self, ConfigError> {
        let mut pngs: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("png"))
                            == Some(true)
                })
                .collect(),
            Err(e) => {
                logger::warn(&format!("target directory {} unreadable: {}", dir.display(), e));
                Vec::new()
            }
        };
        pngs.sort();

        let mut set = TargetSet::default();
        for name in TargetName::ALL {
            let aliases: Vec<String> = name.aliases().iter().map(|a| normalize_stem(a)).collect();
            let found = pngs.iter().find(|p| {
                p.file_stem()
                    .map(|s| aliases.contains(&normalize_stem(&s.to_string_lossy())))
                    .unwrap_or(false)
            });
            if let Some(path) = found {
                set.insert(TargetSpec {
                    name,
                    locator: Locator::Template(path.clone()),
                    min_confidence: floors.get(name.as_str()).copied(),
                });
            }
        }
        set.require()?;
        Ok(set)
    }

    /// Build targets from configured selectors. Unknown keys are ignored
    /// with a warning; empty values leave the target unresolved.
    pub fn from_selectors(
        selectors: &BTreeMap<String, String>,
        floors: &BTreeMap<String, f64>,
    ) -> Result<Self, ConfigError> {
        let mut set = TargetSet::default();
        for (key, raw) in selectors {
            let Some(name) = TargetName::parse(key) else {
                logger::warn(&format!("ignoring selector for unknown target '{}'", key));
                continue;
            };
            if raw.trim().is_empty() {
                continue;
            }
            set.insert(TargetSpec {
                name,
                locator: Locator::from_selector(raw),
                min_confidence: floors.get(key).copied(),
            });
        }
        set.require()?;
        Ok(set)
    }

    /// Pick the target source that matches the configured backend.
    pub fn for_config(config: &RunConfig) -> Result<Self, ConfigError> {
        match config.backend {
            crate::config::BackendKind::Screen => {
                Self::from_template_dir(&config.targets_dir, &config.confidence_floors)
            }
            crate::config::BackendKind::Webdriver | crate::config::BackendKind::Stub => {
                Self::from_selectors(&config.selectors, &config.confidence_floors)
            }
        }
    }

    pub fn insert(&mut self, spec: TargetSpec) {
        self.specs.insert(spec.name, spec);
    }

    pub fn get(&self, name: TargetName) -> Option<&TargetSpec> {
        self.specs.get(&name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    fn require(&self) -> Result<(), ConfigError> {
        for name in TargetName::REQUIRED {
            if !self.specs.contains_key(&name) {
                return Err(ConfigError::MissingTarget(name.as_str()));
            }
        }
        for name in TargetName::ALL {
            if !self.specs.contains_key(&name) {
                logger::warn(&format!("optional target '{}' not configured; its probe always misses", name));
            }
        }
        Ok(())
    }
}
