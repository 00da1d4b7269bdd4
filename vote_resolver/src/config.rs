// ********* Identifiers ***********

use std::fmt::Display;
use std::ops::{Add, AddAssign, BitOr, BitOrAssign};
use std::str::FromStr;

/// Opaque identifier of a base item or of a candidate item, as handed out by
/// the identifier store.
pub type ItemId = i32;

pub type VoterId = i32;

/// Candidate id used by a ballot to record an explicit abstention.
pub const ABSTAIN: ItemId = -1;

// ********* Voters ***********

/// Seniority of a voter. The declaration order is the order of authority:
/// `Admin` is the most senior tier.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum Tier {
    Admin,
    Tc,
    Expert,
    Vetter,
    Street,
    Locked,
}

impl Tier {
    pub const ADMIN_VOTE: u32 = 64;
    pub const EXPERT_VOTE: u32 = 8;
    pub const VETTER_VOTE: u32 = 4;
    pub const STREET_VOTE: u32 = 1;

    /// The weight an organizational vote carries when this tier is the most
    /// senior one behind it. Locked voters cast no countable vote.
    pub fn vote_weight(self) -> Option<Score> {
        match self {
            Tier::Admin | Tier::Tc => Some(Score(Tier::ADMIN_VOTE)),
            Tier::Expert => Some(Score(Tier::EXPERT_VOTE)),
            Tier::Vetter => Some(Score(Tier::VETTER_VOTE)),
            Tier::Street => Some(Score(Tier::STREET_VOTE)),
            Tier::Locked => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Admin => "admin",
            Tier::Tc => "tc",
            Tier::Expert => "expert",
            Tier::Vetter => "vetter",
            Tier::Street => "street",
            Tier::Locked => "locked",
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Tier::Admin),
            "tc" => Ok(Tier::Tc),
            "expert" => Ok(Tier::Expert),
            "vetter" => Ok(Tier::Vetter),
            "street" => Ok(Tier::Street),
            "locked" => Ok(Tier::Locked),
            x => Err(format!("unknown voter tier {:?}", x)),
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ********* Outcome classification ***********

/// Confidence of a resolved value. Ordered from `Missing` (lowest) to
/// `Approved` (highest).
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum Status {
    Missing,
    Unconfirmed,
    Provisional,
    Contributed,
    Approved,
}

impl Status {
    pub fn name(self) -> &'static str {
        match self {
            Status::Missing => "missing",
            Status::Unconfirmed => "unconfirmed",
            Status::Provisional => "provisional",
            Status::Contributed => "contributed",
            Status::Approved => "approved",
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "missing" | "indeterminate" => Ok(Status::Missing),
            "unconfirmed" => Ok(Status::Unconfirmed),
            "provisional" => Ok(Status::Provisional),
            "contributed" => Ok(Status::Contributed),
            "approved" => Ok(Status::Approved),
            x => Err(format!("unknown status {:?}", x)),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The accumulated weight of the organizations behind a candidate.
#[derive(Eq, PartialEq, Debug, Clone, Copy, PartialOrd, Ord, Hash, Default)]
pub struct Score(pub u32);

impl Score {
    pub const EMPTY: Score = Score(0);

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl std::iter::Sum for Score {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Score(iter.map(|s| s.0).sum())
    }
}

impl AddAssign for Score {
    fn add_assign(&mut self, rhs: Score) {
        self.0 += rhs.0;
    }
}

impl Add for Score {
    type Output = Score;
    fn add(self: Score, rhs: Score) -> Score {
        Score(self.0 + rhs.0)
    }
}

impl Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result type of a contest, kept for auditing. These are bit flags: a
/// locale's aggregate status is the union of the flags of all its contests.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Default)]
pub struct ResultFlags(pub u32);

impl ResultFlags {
    pub const EMPTY: ResultFlags = ResultFlags(0);
    /// No votes for the data.
    pub const NO_VOTES: ResultFlags = ResultFlags(1);
    /// Some votes, but not enough to resolve.
    pub const INSUFFICIENT: ResultFlags = ResultFlags(2);
    /// A disqualified winner, or a dropped input.
    pub const ERROR: ResultFlags = ResultFlags(4);
    pub const DISPUTED: ResultFlags = ResultFlags(8);
    pub const ADMIN: ResultFlags = ResultFlags(64);
    pub const TC: ResultFlags = ResultFlags(128);
    pub const GOOD: ResultFlags = ResultFlags(256);
    pub const UNANIMOUS: ResultFlags = ResultFlags(512);
    pub const NO_CHANGE: ResultFlags = ResultFlags(1024);
    pub const REMOVAL: ResultFlags = ResultFlags(2048);

    pub const BAD_MASK: ResultFlags = ResultFlags(1 | 2 | 4 | 8);

    /// One letter per bit position, used by the compact display.
    const LETTERS: &'static str = "0IXD??ATGUNR";

    pub fn contains(self, other: ResultFlags) -> bool {
        other.0 != 0 && (self.0 & other.0) == other.0
    }

    pub fn intersects(self, other: ResultFlags) -> bool {
        (self.0 & other.0) != 0
    }

    /// True if the data behind this result needs human attention.
    pub fn is_bad(self) -> bool {
        self.intersects(ResultFlags::BAD_MASK)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ResultFlags {
    type Output = ResultFlags;
    fn bitor(self, rhs: ResultFlags) -> ResultFlags {
        ResultFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ResultFlags {
    fn bitor_assign(&mut self, rhs: ResultFlags) {
        self.0 |= rhs.0;
    }
}

impl Display for ResultFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            return write!(f, "z");
        }
        for (idx, letter) in ResultFlags::LETTERS.chars().enumerate() {
            if self.0 & (1 << idx) != 0 {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

// ********* Configuration **********

/// What a failed validation does to a candidate.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum DisqualifyMode {
    /// The candidate loses its score and cannot win.
    Strict,
    /// The candidate is only flagged for reporting; its score stands.
    Advisory,
}

/// How equally scored candidates are ordered.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum TieBreakMode {
    RootCollation,
    CodepointOrder,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ResolverRules {
    pub disqualify_mode: DisqualifyMode,
    pub tiebreak_mode: TieBreakMode,
    /// O must reach this score (and O >= 2N) for an approved result.
    pub approved_threshold: Score,
    /// O must reach this score for a contributed or provisional result.
    pub minimum_threshold: Score,
    /// Distinct organizations needed behind a contributed winner.
    pub contributed_organizations: usize,
    /// First number used to tag losing alternates ("proposed-x1000").
    pub alternate_base: u32,
    /// Number of threads resolving contests during a batch run.
    pub workers: usize,
}

impl ResolverRules {
    pub const DEFAULT_RULES: ResolverRules = ResolverRules {
        disqualify_mode: DisqualifyMode::Advisory,
        tiebreak_mode: TieBreakMode::RootCollation,
        approved_threshold: Score(8),
        minimum_threshold: Score(2),
        contributed_organizations: 2,
        alternate_base: 1000,
        workers: 1,
    };

    pub fn is_strict(&self) -> bool {
        self.disqualify_mode == DisqualifyMode::Strict
    }
}

impl Default for ResolverRules {
    fn default() -> Self {
        ResolverRules::DEFAULT_RULES
    }
}
