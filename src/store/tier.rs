//! Session tiers and their static security assessment.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Security tier of a session store, weakest isolation first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionTier {
    /// Survives process restarts; weakest isolation.
    Persistent,
    /// Survives store re-creation, gone with the process.
    #[default]
    Tab,
    /// Lost as soon as the store is dropped; nothing is persisted.
    MemoryOnly,
    /// The real session lives in a server-side cookie; locally memory-backed.
    BackendManaged,
}

impl SessionTier {
    pub const ALL: [SessionTier; 4] = [
        SessionTier::Persistent,
        SessionTier::Tab,
        SessionTier::MemoryOnly,
        SessionTier::BackendManaged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::Tab => "tab",
            Self::MemoryOnly => "memory-only",
            Self::BackendManaged => "backend-managed",
        }
    }

    /// Risks inherent to the tier.
    pub fn risks(&self) -> &'static [&'static str] {
        match self {
            Self::Persistent => &[
                "XSS Vulnerable",
                "CSRF Vulnerable",
                "Persistent Storage",
                "Data Exposure",
            ],
            Self::Tab => &["XSS Vulnerable", "CSRF Vulnerable", "Tab-based Storage"],
            Self::MemoryOnly => &["XSS Vulnerable", "No Persistence", "Session Loss on Refresh"],
            Self::BackendManaged => &["Backend Dependent", "Requires HTTPS"],
        }
    }

    /// Hardening steps recommended for the tier.
    pub fn recommendations(&self) -> &'static [&'static str] {
        match self {
            Self::Persistent => &[
                "Upgrade to tab or memory-only security level",
                "Implement Content Security Policy (CSP)",
                "Use httpOnly cookies for sensitive data",
                "Implement proper XSS protection",
            ],
            Self::Tab => &[
                "Consider memory-only security for sensitive applications",
                "Implement CSP headers",
                "Use secure and httpOnly cookies where possible",
            ],
            Self::MemoryOnly => &[
                "Implement proper session timeout",
                "Use secure token refresh mechanisms",
                "Consider backend session management",
            ],
            Self::BackendManaged => &[],
        }
    }
}

impl fmt::Display for SessionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "persistent" | "low" => Ok(Self::Persistent),
            "tab" | "medium" => Ok(Self::Tab),
            "memory-only" | "memory" | "high" => Ok(Self::MemoryOnly),
            "backend-managed" | "backend" | "production" => Ok(Self::BackendManaged),
            other => Err(format!(
                "Unknown session tier `{}` (expected persistent, tab, memory-only or backend-managed)",
                other
            )),
        }
    }
}

/// Descriptive security report for the active tier.
///
/// Keyed only by the tier, never by store contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAssessment {
    pub tier: SessionTier,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
    pub penetration_test_ready: bool,
}

impl SecurityAssessment {
    pub fn for_tier(tier: SessionTier) -> Self {
        Self {
            tier,
            risks: tier.risks().iter().map(|s| s.to_string()).collect(),
            recommendations: tier.recommendations().iter().map(|s| s.to_string()).collect(),
            penetration_test_ready: tier != SessionTier::Persistent,
        }
    }
}
