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

/// Command line of the daemon
#[derive(Debug, clap::Parser, PartialEq, Eq)]
#[clap(about, version, author)]
pub struct Args {
    /// Path of the configuration file, toml or json (by extension)
    #[clap(short, long)]
    pub config: Option<String>,

    /// Load and check the configuration, then exit
    #[clap(long)]
    pub test_config: bool,
}
