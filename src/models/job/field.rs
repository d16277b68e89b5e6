use std::fmt;
use std::str::FromStr;

use redis::{self, FromRedisValue, ToRedisArgs};
use serde::Serialize;

const STATUS_FIELD: &str = "status";
const PROGRESS_FIELD: &str = "progress";
const GROUP_FIELD: &str = "group";
const DATA_FIELD: &str = "data";

/// Represents a job field that's stored in a Redis hash.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Status,
    Progress,
    Group,
    Data,
}

impl Field {
    pub fn all_fields() -> &'static [Field] {
        static ALL_FIELDS: [Field; 4] = [Field::Status, Field::Progress, Field::Group, Field::Data];
        &ALL_FIELDS
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AsRef<str> for Field {
    fn as_ref(&self) -> &str {
        match self {
            Field::Status => STATUS_FIELD,
            Field::Progress => PROGRESS_FIELD,
            Field::Group => GROUP_FIELD,
            Field::Data => DATA_FIELD,
        }
    }
}

impl FromStr for Field {
    type Err = ();

    fn from_str(s: &str) -> Result<Field, ()> {
        match s {
            STATUS_FIELD => Ok(Field::Status),
            PROGRESS_FIELD => Ok(Field::Progress),
            GROUP_FIELD => Ok(Field::Group),
            DATA_FIELD => Ok(Field::Data),
            _ => Err(()),
        }
    }
}

impl ToRedisArgs for Field {
    fn write_redis_args<W: ?Sized + redis::RedisWrite>(&self, out: &mut W) {
        self.as_ref().write_redis_args(out)
    }
}

impl FromRedisValue for Field {
    fn from_redis_value(v: &redis::Value) -> redis::RedisResult<Self> {
        let s: String = String::from_redis_value(v)?;
        Field::from_str(&s).map_err(|_| (redis::ErrorKind::TypeError, "Invalid job field").into())
    }
}
