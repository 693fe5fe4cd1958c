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

pub fn serialize<S: serde::Serializer>(
    value: &tracing::level_filters::LevelFilter,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string().to_ascii_lowercase())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<tracing::level_filters::LevelFilter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let level = <String as serde::Deserialize>::deserialize(deserializer)?;

    <tracing::level_filters::LevelFilter as std::str::FromStr>::from_str(&level).map_err(|_| {
        serde::de::Error::custom(format!(
            "'{level}' is not a log level, expected one of: off, error, warn, info, debug, trace"
        ))
    })
}
