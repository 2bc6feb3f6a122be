//! Server dialect resolution
//!
//! The server's `@@VERSION` banner is inspected once per session and turned
//! into an immutable [`Capabilities`] value. Catalog readers and the statement
//! synthesizer branch on these flags only; nothing else looks at the banner.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ReconcileError, Result};
use crate::util::starts_with_ci;

/// Banner prefix reported by the hosted (Azure SQL Database) edition
const HOSTED_BANNER_PREFIX: &str = "Microsoft SQL Azure";

/// Product major version the hosted edition reports in its banner
const HOSTED_MAJOR_VERSION: u16 = 12;

/// Compatibility level below which `STRING_SPLIT` is unavailable
pub const STRING_SPLIT_COMPATIBILITY_LEVEL: u16 = 130;

/// `- 16.0.4095.4` style product version inside the banner
static PRODUCT_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\s*(\d+)\.(\d+)\.\d+").unwrap());

/// Feature-capability variant of the target server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edition {
    OnPremises,
    Hosted,
}

/// SQL Server release, keyed by product major version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SqlServerVersion {
    Sql120, // SQL Server 2014
    Sql130, // SQL Server 2016
    Sql140, // SQL Server 2017
    Sql150, // SQL Server 2019
    Sql160, // SQL Server 2022
}

impl SqlServerVersion {
    pub fn from_major(major: u16) -> Option<Self> {
        match major {
            12 => Some(SqlServerVersion::Sql120),
            13 => Some(SqlServerVersion::Sql130),
            14 => Some(SqlServerVersion::Sql140),
            15 => Some(SqlServerVersion::Sql150),
            16 => Some(SqlServerVersion::Sql160),
            _ => None,
        }
    }

    /// Default database compatibility level of a fresh database on this release
    pub fn compatibility_level(&self) -> u16 {
        match self {
            SqlServerVersion::Sql120 => 120,
            SqlServerVersion::Sql130 => 130,
            SqlServerVersion::Sql140 => 140,
            SqlServerVersion::Sql150 => 150,
            SqlServerVersion::Sql160 => 160,
        }
    }
}

/// Resolved, immutable capability set of one server session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    edition: Edition,
    major_version: u16,
    compatibility_level: Option<u16>,
    supports_default_language: bool,
    supports_native_string_split: bool,
    supports_cross_database_qualified_names: bool,
    supports_string_agg: bool,
    supports_external_provider: bool,
    supports_elastic_query: bool,
}

impl Capabilities {
    /// Resolve capabilities from the server's self-reported version banner.
    pub fn resolve(version_banner: &str) -> Result<Self> {
        let banner = version_banner.trim();
        let edition = if starts_with_ci(banner, HOSTED_BANNER_PREFIX) {
            Edition::Hosted
        } else {
            Edition::OnPremises
        };

        let major_version = PRODUCT_VERSION_RE
            .captures(banner)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .ok_or_else(|| {
                ReconcileError::validation(
                    "server version",
                    format!("unrecognized version banner: {}", first_line(banner)),
                )
            })?;

        Ok(Self::from_parts(edition, major_version, None))
    }

    /// Capabilities of a target platform named the way build tooling names
    /// them (`Sql130` .. `Sql160`, or `Azure` for the hosted edition). Used
    /// when planning without a live server.
    pub fn for_target_platform(platform: &str) -> Result<Self> {
        let platform = platform.trim();
        if platform.eq_ignore_ascii_case("azure") || platform.eq_ignore_ascii_case("SqlAzure") {
            return Ok(Self::from_parts(Edition::Hosted, HOSTED_MAJOR_VERSION, None));
        }
        let major = platform
            .get(..3)
            .filter(|prefix| prefix.eq_ignore_ascii_case("sql"))
            .and_then(|_| platform[3..].parse::<u16>().ok())
            .map(|number| number / 10)
            .filter(|major| SqlServerVersion::from_major(*major).is_some())
            .ok_or_else(|| {
                ReconcileError::validation(
                    "target platform",
                    format!("'{}' is not one of Sql120, Sql130, Sql140, Sql150, Sql160, Azure", platform),
                )
            })?;
        Ok(Self::from_parts(Edition::OnPremises, major, None))
    }

    /// Narrow the capability set by a database compatibility level.
    pub fn with_compatibility_level(self, level: u16) -> Self {
        Self::from_parts(self.edition, self.major_version, Some(level))
    }

    fn from_parts(edition: Edition, major_version: u16, compatibility_level: Option<u16>) -> Self {
        let hosted = edition == Edition::Hosted;
        let level_allows_split = compatibility_level
            .map(|level| level >= STRING_SPLIT_COMPATIBILITY_LEVEL)
            .unwrap_or(true);
        Self {
            edition,
            major_version,
            compatibility_level,
            supports_default_language: !hosted,
            supports_native_string_split: (hosted || major_version >= 13) && level_allows_split,
            supports_cross_database_qualified_names: !hosted,
            supports_string_agg: hosted || major_version >= 14,
            supports_external_provider: hosted || major_version >= 16,
            supports_elastic_query: hosted,
        }
    }

    pub fn edition(&self) -> Edition {
        self.edition
    }

    pub fn major_version(&self) -> u16 {
        self.major_version
    }

    pub fn version(&self) -> Option<SqlServerVersion> {
        SqlServerVersion::from_major(self.major_version)
    }

    pub fn compatibility_level(&self) -> Option<u16> {
        self.compatibility_level
    }

    pub fn is_hosted_edition(&self) -> bool {
        self.edition == Edition::Hosted
    }

    /// `DEFAULT_LANGUAGE` clause on CREATE/ALTER USER and LOGIN
    pub fn supports_default_language(&self) -> bool {
        self.supports_default_language
    }

    pub fn supports_native_string_split(&self) -> bool {
        self.supports_native_string_split
    }

    /// `[db].[sys].[view]` references and `[master]` joins
    pub fn supports_cross_database_qualified_names(&self) -> bool {
        self.supports_cross_database_qualified_names
    }

    pub fn supports_string_agg(&self) -> bool {
        self.supports_string_agg
    }

    /// `FROM EXTERNAL PROVIDER` principals (Entra ID)
    pub fn supports_external_provider(&self) -> bool {
        self.supports_external_provider
    }

    /// `TYPE = RDBMS` external data sources
    pub fn supports_elastic_query(&self) -> bool {
        self.supports_elastic_query
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}
