// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Core value types for the port contract.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier naming one fetch-and-cache transaction.
///
/// Generated by the registry, never reused. Serializes as the hyphenated
/// UUID string hosts pass around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Host-assigned identifier of a display container (e.g. a view tag).
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which request variant produced a renderable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Single-size request.
    Standard,
    /// Multi-size request with manual impressions and app events.
    Managed,
}

/// Ad dimensions in density-independent units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdSize {
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl AdSize {
    /// Build a size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for AdSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Error parsing an [`AdSizeSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ad size `{0}`")]
pub struct SizeSpecError(pub String);

/// Requested ad size: a named constant or custom `<w>x<h>` dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdSizeSpec {
    /// 320x50.
    Banner,
    /// 320x100.
    LargeBanner,
    /// 300x250.
    MediumRectangle,
    /// 468x60.
    FullBanner,
    /// 728x90.
    Leaderboard,
    /// 160x600.
    WideSkyscraper,
    /// Fills the container width; height decided by the ad.
    Fluid,
    /// Adaptive banner; size decided by the fetch collaborator.
    AdaptiveBanner,
    /// Anchored adaptive banner.
    AnchoredAdaptiveBanner,
    /// Inline adaptive banner.
    InlineAdaptiveBanner,
    /// Explicit dimensions.
    Custom(AdSize),
}

impl AdSizeSpec {
    /// Dimensions known before loading, if the spec is not adaptive.
    pub fn fixed_size(&self) -> Option<AdSize> {
        match self {
            Self::Banner => Some(AdSize::new(320, 50)),
            Self::LargeBanner => Some(AdSize::new(320, 100)),
            Self::MediumRectangle => Some(AdSize::new(300, 250)),
            Self::FullBanner => Some(AdSize::new(468, 60)),
            Self::Leaderboard => Some(AdSize::new(728, 90)),
            Self::WideSkyscraper => Some(AdSize::new(160, 600)),
            Self::Custom(size) => Some(*size),
            Self::Fluid
            | Self::AdaptiveBanner
            | Self::AnchoredAdaptiveBanner
            | Self::InlineAdaptiveBanner => None,
        }
    }
}

impl FromStr for AdSizeSpec {
    type Err = SizeSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = match s {
            "BANNER" => Self::Banner,
            "LARGE_BANNER" => Self::LargeBanner,
            "MEDIUM_RECTANGLE" => Self::MediumRectangle,
            "FULL_BANNER" => Self::FullBanner,
            "LEADERBOARD" => Self::Leaderboard,
            "WIDE_SKYSCRAPER" => Self::WideSkyscraper,
            "FLUID" => Self::Fluid,
            "ADAPTIVE_BANNER" => Self::AdaptiveBanner,
            "ANCHORED_ADAPTIVE_BANNER" => Self::AnchoredAdaptiveBanner,
            "INLINE_ADAPTIVE_BANNER" => Self::InlineAdaptiveBanner,
            custom => {
                let (w, h) = custom
                    .split_once('x')
                    .ok_or_else(|| SizeSpecError(custom.to_string()))?;
                let width = w.parse().map_err(|_| SizeSpecError(custom.to_string()))?;
                let height = h.parse().map_err(|_| SizeSpecError(custom.to_string()))?;
                if width == 0 || height == 0 {
                    return Err(SizeSpecError(custom.to_string()));
                }
                Self::Custom(AdSize::new(width, height))
            }
        };
        Ok(spec)
    }
}

impl fmt::Display for AdSizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Banner => "BANNER",
            Self::LargeBanner => "LARGE_BANNER",
            Self::MediumRectangle => "MEDIUM_RECTANGLE",
            Self::FullBanner => "FULL_BANNER",
            Self::Leaderboard => "LEADERBOARD",
            Self::WideSkyscraper => "WIDE_SKYSCRAPER",
            Self::Fluid => "FLUID",
            Self::AdaptiveBanner => "ADAPTIVE_BANNER",
            Self::AnchoredAdaptiveBanner => "ANCHORED_ADAPTIVE_BANNER",
            Self::InlineAdaptiveBanner => "INLINE_ADAPTIVE_BANNER",
            Self::Custom(size) => return write!(f, "{size}"),
        };
        f.write_str(name)
    }
}

/// Longest accepted content URL.
const MAX_CONTENT_URL_LEN: usize = 512;

/// Error validating [`RequestOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    /// A keyword was empty.
    #[error("'options.keywords' expected non-empty strings")]
    EmptyKeyword,
    /// A URL was empty, not http(s), or too long.
    #[error("'options.{field}' expected an http(s) URL of at most 512 characters")]
    BadUrl {
        /// Offending field name.
        field: &'static str,
    },
    /// A targeting key was empty.
    #[error("'options.customTargeting' keys must be non-empty")]
    EmptyTargetingKey,
}

/// Targeting options forwarded opaquely to the fetch collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    /// Request only non-personalized ads.
    pub request_non_personalized_ads_only: bool,
    /// Targeting keywords.
    pub keywords: Vec<String>,
    /// URL of the content shown alongside the ad.
    pub content_url: Option<String>,
    /// URLs of neighboring content.
    pub neighboring_content_urls: Vec<String>,
    /// Free-form request agent string.
    pub request_agent: Option<String>,
    /// Key/value custom targeting (managed requests).
    pub custom_targeting: BTreeMap<String, String>,
    /// Extra parameters for the ad network adapter.
    pub network_extras: BTreeMap<String, String>,
}

impl RequestOptions {
    /// Check the options before they reach the collaborator.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(OptionsError::EmptyKeyword);
        }
        if let Some(url) = &self.content_url {
            check_url(url, "contentUrl")?;
        }
        for url in &self.neighboring_content_urls {
            check_url(url, "neighboringContentUrls")?;
        }
        if self.custom_targeting.keys().any(String::is_empty) {
            return Err(OptionsError::EmptyTargetingKey);
        }
        Ok(())
    }
}

fn check_url(url: &str, field: &'static str) -> Result<(), OptionsError> {
    let scheme_ok = url.starts_with("http://") || url.starts_with("https://");
    if !scheme_ok || url.len() > MAX_CONTENT_URL_LEN {
        return Err(OptionsError::BadUrl { field });
    }
    Ok(())
}

/// Everything the fetch collaborator needs to produce one renderable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    /// Identifier the registry assigned to this request.
    pub request_id: RequestId,
    /// Request variant.
    pub kind: RequestKind,
    /// Ad unit identifier.
    pub unit_id: String,
    /// Acceptable sizes, in preference order. Exactly one for standard requests.
    pub sizes: Vec<AdSizeSpec>,
    /// Targeting options.
    pub options: RequestOptions,
    /// Whether the host records impressions manually (managed only).
    pub manual_impressions: bool,
}
