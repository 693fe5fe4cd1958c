/**
 * maild SMTP receiving daemon
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
**/
/// A duration written as a number of seconds or as a humantime string (`"30s"`, `"2m"`)

pub fn serialize<S: serde::Serializer>(
    value: &std::time::Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    humantime_serde::serialize(value, serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<std::time::Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserializer.deserialize_any(TimeoutVisitor)
}

struct TimeoutVisitor;

impl<'de> serde::de::Visitor<'de> for TimeoutVisitor {
    type Value = std::time::Duration;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a number of seconds or a duration such as \"30s\"")
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(std::time::Duration::from_secs(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(std::time::Duration::from_secs)
            .map_err(|_| E::custom(format!("'{v}' is not a positive number of seconds")))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        humantime_serde::re::humantime::parse_duration(v)
            .map_err(|e| E::custom(format!("'{v}' is not a duration: {e}")))
    }
}
