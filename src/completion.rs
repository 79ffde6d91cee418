//! Course completion records and the identifiers they carry.
//!
//! A [CourseCompletion] is immutable once constructed. Its identity for
//! hashing purposes is the tuple (issuer, student, term, course, attempt),
//! see [CourseCompletion::identity].

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use std::{fmt, str::FromStr};

/// Max length of any identifier, in bytes.
pub const IDENTIFIER_MAX_BYTES: usize = 256;

// -------------------------------------------------------------------------------------------------
// Identifiers.

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdentifierError;

            /// Constructor that takes in a string slice.
            /// Empty strings and strings longer than [IDENTIFIER_MAX_BYTES]
            /// give an error.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    Err(IdentifierError::Empty)
                } else if s.len() > IDENTIFIER_MAX_BYTES {
                    Err(IdentifierError::TooLong { len: s.len() })
                } else {
                    Ok($name(s.to_owned()))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_identifier!(
    /// Opaque identifier of a student, supplied by the caller.
    ///
    /// The aggregation tree never stores this value directly, only its hash
    /// (see [crate::TermAggregationTree]).
    StudentKey
);

string_identifier!(
    /// Identifier of an academic term, e.g. `2024-fall`.
    TermId
);

string_identifier!(
    /// Identifier of a course, e.g. `CS101`.
    CourseId
);

string_identifier!(
    /// Identifier of the institution issuing the credential.
    IssuerId
);

// -------------------------------------------------------------------------------------------------
// Timestamps.

/// The four lifecycle timestamps of a completion, in Unix seconds.
///
/// A valid record satisfies `started <= completed <= assessed <= issued`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamps {
    pub started: u64,
    pub completed: u64,
    pub assessed: u64,
    pub issued: u64,
}

impl Timestamps {
    /// Check the timestamps are monotonically ordered.
    ///
    /// The error names the first pair found out of order.
    pub fn check_order(&self) -> Result<(), TimestampOrderError> {
        let ordered = [
            ("started", self.started),
            ("completed", self.completed),
            ("assessed", self.assessed),
            ("issued", self.issued),
        ];

        for pair in ordered.windows(2) {
            let (earlier_name, earlier) = pair[0];
            let (later_name, later) = pair[1];
            if earlier > later {
                return Err(TimestampOrderError {
                    earlier: earlier_name,
                    later: later_name,
                    earlier_value: earlier,
                    later_value: later,
                });
            }
        }

        Ok(())
    }
}

/// A pair of timestamps that violates `started <= completed <= assessed <= issued`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Timestamp {earlier} ({earlier_value}) is after {later} ({later_value})")]
pub struct TimestampOrderError {
    pub earlier: &'static str,
    pub later: &'static str,
    pub earlier_value: u64,
    pub later_value: u64,
}

// -------------------------------------------------------------------------------------------------
// Course completion.

/// One course completion, as issued by an institution.
///
/// Example:
/// ```
/// use credacc::{CourseCompletionBuilder, Timestamps};
/// use std::str::FromStr;
///
/// let completion = CourseCompletionBuilder::default()
///     .issuer(credacc::IssuerId::from_str("uni").unwrap())
///     .student(credacc::StudentKey::from_str("alice").unwrap())
///     .term(credacc::TermId::from_str("T1").unwrap())
///     .course(credacc::CourseId::from_str("C1").unwrap())
///     .attempt(1u32)
///     .timestamps(Timestamps { started: 1, completed: 2, assessed: 3, issued: 4 })
///     .grade("A")
///     .credits(5u16)
///     .build()
///     .unwrap();
///
/// assert!(completion.timestamps().check_order().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
pub struct CourseCompletion {
    issuer: IssuerId,
    student: StudentKey,
    term: TermId,
    course: CourseId,
    attempt: u32,
    timestamps: Timestamps,
    grade: String,
    credits: u16,
}

/// The tuple that identifies a completion for hashing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionIdentity<'a> {
    pub issuer: &'a IssuerId,
    pub student: &'a StudentKey,
    pub term: &'a TermId,
    pub course: &'a CourseId,
    pub attempt: u32,
}

impl CourseCompletion {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        issuer: IssuerId,
        student: StudentKey,
        term: TermId,
        course: CourseId,
        attempt: u32,
        timestamps: Timestamps,
        grade: String,
        credits: u16,
    ) -> Self {
        CourseCompletion {
            issuer,
            student,
            term,
            course,
            attempt,
            timestamps,
            grade,
            credits,
        }
    }

    pub fn identity(&self) -> CompletionIdentity<'_> {
        CompletionIdentity {
            issuer: &self.issuer,
            student: &self.student,
            term: &self.term,
            course: &self.course,
            attempt: self.attempt,
        }
    }

    pub fn issuer(&self) -> &IssuerId {
        &self.issuer
    }

    pub fn student(&self) -> &StudentKey {
        &self.student
    }

    pub fn term(&self) -> &TermId {
        &self.term
    }

    pub fn course(&self) -> &CourseId {
        &self.course
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }

    pub fn grade(&self) -> &str {
        &self.grade
    }

    pub fn credits(&self) -> u16 {
        self.credits
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

/// Errors encountered when parsing an identifier.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Identifier cannot be empty")]
    Empty,
    #[error("Identifier has {len} bytes but the max allowed is {IDENTIFIER_MAX_BYTES}")]
    TooLong { len: usize },
}

// -------------------------------------------------------------------------------------------------
// Unit tests.
