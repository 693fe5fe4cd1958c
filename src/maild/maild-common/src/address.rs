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

/// Errors produced while parsing a mailbox
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// no `@` separating local part and domain
    #[error("'{0}' is missing the '@' separator")]
    MissingAtSign(String),
    /// nothing before the `@`
    #[error("'{0}' has an empty local part")]
    EmptyLocalPart(String),
    /// nothing after the `@`
    #[error("'{0}' has an empty domain")]
    EmptyDomain(String),
    /// whitespace, control characters or angle brackets
    #[error("'{0}' contains forbidden characters")]
    ForbiddenCharacter(String),
}

/// A mailbox `local-part@domain`
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    full: String,
    at_sign: usize,
}

impl Address {
    /// Parse a mailbox
    ///
    /// # Errors
    ///
    /// * see [`AddressError`]
    pub fn new(addr: &str) -> Result<Self, AddressError> {
        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(AddressError::ForbiddenCharacter(addr.to_string()));
        }
        let at_sign = addr
            .rfind('@')
            .ok_or_else(|| AddressError::MissingAtSign(addr.to_string()))?;

        if at_sign == 0 {
            return Err(AddressError::EmptyLocalPart(addr.to_string()));
        }
        if at_sign == addr.len() - 1 {
            return Err(AddressError::EmptyDomain(addr.to_string()));
        }

        Ok(Self {
            full: addr.to_string(),
            at_sign,
        })
    }

    /// `local-part@domain`
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// everything before the last `@`
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.full[..self.at_sign]
    }

    /// everything after the last `@`
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.full[self.at_sign + 1..]
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.full
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}
