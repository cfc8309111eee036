use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use uuid::Uuid;

use super::error::{EngineError, EngineResult, InvalidIdSnafu};

// Every id wrapper shares one shape so stores and logs can treat them alike.
macro_rules! define_engine_id {
    ($name:ident, $id_type:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> EngineResult<Self> {
                let parsed = Uuid::parse_str(raw.trim()).context(InvalidIdSnafu {
                    stage: "parse-engine-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(raw: &str) -> EngineResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_engine_id!(JobId, "job-id");
define_engine_id!(ExchangeId, "exchange-id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        let id = JobId::new_v7();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_garbage_with_id_type() {
        let error = ExchangeId::parse("not-a-uuid").unwrap_err();
        match error {
            EngineError::InvalidId { id_type, raw, .. } => {
                assert_eq!(id_type, "exchange-id");
                assert_eq!(raw, "not-a-uuid");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
