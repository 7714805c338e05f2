use serde::Serialize;

/// OAI-PMH request verbs used by this harvester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Identify,
    ListSets,
    ListRecords,
}

impl Verb {
    /// The exact verb string sent in the `verb` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Identify => "Identify",
            Verb::ListSets => "ListSets",
            Verb::ListRecords => "ListRecords",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Date-time precision a repository accepts and emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// `YYYY-MM-DD`
    Day,
    /// `YYYY-MM-DDThh:mm:ssZ`
    Seconds,
}

impl Granularity {
    pub const DAY_TOKEN: &'static str = "YYYY-MM-DD";
    pub const SECONDS_TOKEN: &'static str = "YYYY-MM-DDThh:mm:ssZ";

    /// Resolves a server-declared granularity token.
    ///
    /// Lenient: any token that is not the day form is treated as
    /// second-level, the finest precision the protocol defines.
    pub fn from_token(token: &str) -> Self {
        if token.trim() == Self::DAY_TOKEN {
            Granularity::Day
        } else {
            Granularity::Seconds
        }
    }

    /// The token form of this granularity.
    pub fn as_token(&self) -> &'static str {
        match self {
            Granularity::Day => Self::DAY_TOKEN,
            Granularity::Seconds => Self::SECONDS_TOKEN,
        }
    }

    /// Clamps a full datestamp to this granularity.
    ///
    /// Day granularity keeps the leading `YYYY-MM-DD`; second granularity
    /// passes the value through unchanged.
    pub fn clamp(&self, datestamp: &str) -> String {
        match self {
            Granularity::Day if datestamp.len() > 10 => datestamp[..10].to_string(),
            _ => datestamp.to_string(),
        }
    }
}

/// Repository facts derived from a single `Identify` call and cached for
/// the lifetime of a driver instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyInfo {
    /// Server-declared datestamp granularity.
    pub granularity: Granularity,
    /// The envelope `responseDate` captured at the moment of the call.
    /// Serves as the canonical end boundary for the run.
    pub response_date: String,
}

/// One `<record>` from a `ListRecords` response.
///
/// `raw` is the verbatim subtree including the `<record>` element itself.
/// The driver never looks inside it; `identifier` and `datestamp` are
/// lifted from the `<header>` during parsing for the writer's benefit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub raw: String,
    pub identifier: Option<String>,
    pub datestamp: Option<String>,
}

/// One `<set>` from a `ListSets` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetInfo {
    pub spec: String,
    pub name: String,
}

/// A parsed OAI-PMH response, tagged at the root.
///
/// Exactly one verb payload (or a protocol error) is present, so consumers
/// match on the variant instead of probing optional children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OaiResponse {
    pub response_date: String,
    pub body: OaiBody,
}

/// The payload variants of an OAI-PMH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OaiBody {
    /// A protocol-level `<error>` element.
    Error { code: String, message: String },
    /// An `Identify` block; only the granularity matters to the driver.
    Identify { granularity: Option<String> },
    /// A `ListRecords` page.
    ListRecords {
        records: Vec<Record>,
        resumption_token: Option<String>,
    },
    /// A `ListSets` page.
    ListSets {
        sets: Vec<SetInfo>,
        resumption_token: Option<String>,
    },
}

/// Mid-harvest resume cursor, persisted after every successful page.
///
/// Serialized as exactly four field-separated values in the order
/// `(set_spec, token, start_date, end_date)`; a missing optional is encoded
/// as the empty string. Anything with a different arity is corrupt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub set_spec: Option<String>,
    pub token: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl Checkpoint {
    /// Number of serialized fields; any other arity is corrupt.
    pub const FIELD_COUNT: usize = 4;

    /// Serializes into the four-slot field list.
    pub fn to_fields(&self) -> [String; Self::FIELD_COUNT] {
        [
            self.set_spec.clone().unwrap_or_default(),
            self.token.clone(),
            self.start_date.clone().unwrap_or_default(),
            self.end_date.clone().unwrap_or_default(),
        ]
    }

    /// Rebuilds a checkpoint from raw persisted fields.
    ///
    /// Returns `None` unless exactly four fields are given; empty strings
    /// decode to `None` for the optional slots.
    pub fn from_fields(fields: &[String]) -> Option<Self> {
        if fields.len() != Self::FIELD_COUNT {
            return None;
        }
        let opt = |s: &String| {
            if s.is_empty() {
                None
            } else {
                Some(s.clone())
            }
        };
        Some(Checkpoint {
            set_spec: opt(&fields[0]),
            token: fields[1].clone(),
            start_date: opt(&fields[2]),
            end_date: opt(&fields[3]),
        })
    }
}
