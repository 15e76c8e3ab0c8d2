#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-test-case verdict.
///
/// `CE` is only ever assigned by the compile stage and `SK` only by the
/// dependency scheduler; the execute-stage classifier produces the rest.
/// When the `sea-orm` feature is enabled, this enum can be used directly in
/// SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Output matches the expected output byte-for-byte after whitespace
    /// removal.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "AC"))]
    Ac,
    /// Output matches only after case folding (presentation error).
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "PE"))]
    Pe,
    /// Output does not match.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "WA"))]
    Wa,
    /// Exceeded the wall-clock timeout.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "TLE"))]
    Tle,
    /// Exceeded the captured-output cap.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "OLE"))]
    Ole,
    /// Exited abnormally for any other reason.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "RE"))]
    Re,
    /// Did not compile.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "CE"))]
    Ce,
    /// Pruned by the dependency scheduler after a prerequisite failed.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "SK"))]
    Sk,
}

impl Verdict {
    pub const ALL: &'static [Verdict] = &[
        Self::Ac,
        Self::Pe,
        Self::Wa,
        Self::Tle,
        Self::Ole,
        Self::Re,
        Self::Ce,
        Self::Sk,
    ];

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Ac)
    }

    /// True for verdicts where the run itself failed (timeout, output cap,
    /// crash). Terminal runs have their stdout discarded and their declared
    /// generated files recorded as missing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Tle | Self::Ole | Self::Re)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ac => "AC",
            Self::Pe => "PE",
            Self::Wa => "WA",
            Self::Tle => "TLE",
            Self::Ole => "OLE",
            Self::Re => "RE",
            Self::Ce => "CE",
            Self::Sk => "SK",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid verdict string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVerdictError {
    invalid: String,
}

impl fmt::Display for ParseVerdictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid verdict '{}'. Valid values: {}",
            self.invalid,
            Verdict::ALL
                .iter()
                .map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseVerdictError {}

impl FromStr for Verdict {
    type Err = ParseVerdictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AC" => Ok(Self::Ac),
            "PE" => Ok(Self::Pe),
            "WA" => Ok(Self::Wa),
            "TLE" => Ok(Self::Tle),
            "OLE" => Ok(Self::Ole),
            "RE" => Ok(Self::Re),
            "CE" => Ok(Self::Ce),
            "SK" => Ok(Self::Sk),
            _ => Err(ParseVerdictError {
                invalid: s.to_string(),
            }),
        }
    }
}

/// Submission-level correctness bucket derived from the ordered verdict
/// list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectnessTier {
    /// Every verdict is AC.
    AllPassed,
    /// Some but not all verdicts are AC.
    Mixed,
    /// No verdict is AC.
    AllFailed,
    /// The submission never compiled.
    DidNotCompile,
}

impl CorrectnessTier {
    /// Tier for a submission whose tests actually ran. `DidNotCompile` is
    /// assigned by the compile stage, never here.
    pub fn from_verdicts(verdicts: &[Verdict]) -> Self {
        if verdicts.iter().all(Verdict::is_accepted) {
            Self::AllPassed
        } else if verdicts.iter().any(Verdict::is_accepted) {
            Self::Mixed
        } else {
            Self::AllFailed
        }
    }

    /// The numeric form used in persisted aggregates.
    pub fn as_i16(&self) -> i16 {
        match self {
            Self::AllPassed => 1,
            Self::Mixed => 2,
            Self::AllFailed => 3,
            Self::DidNotCompile => 0,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(Self::AllPassed),
            2 => Some(Self::Mixed),
            3 => Some(Self::AllFailed),
            0 => Some(Self::DidNotCompile),
            _ => None,
        }
    }
}
