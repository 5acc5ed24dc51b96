//! Platform identifiers.
//!
//! Snowflake-style ids are carried as `u64` newtypes so guild, channel and
//! message ids can never be mixed up. In JSON they serialize as bare numbers,
//! or as strings when used as map keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }
    };
}

snowflake_id!(
    /// A guild (tenant). Glossary and mirror state is partitioned by it.
    GuildId
);
snowflake_id!(ChannelId);
snowflake_id!(UserId);
snowflake_id!(
    /// Message ids grow with creation time.
    MessageId
);
