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
mod command;
mod connection;
mod session;

pub use command::Command;
pub use connection::{Connection, Io, Line, ReadError};
pub use session::{handle_connection, Context, State, COMMAND_LINE_LIMIT, MAX_UNRECOGNIZED};

#[cfg(test)]
mod tests;

/// boilerplate for the tests
#[cfg(test)]
pub(crate) mod test_helpers;
