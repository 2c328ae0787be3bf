// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CLI entry point for refgraph.
#![allow(clippy::print_stdout)]

use anyhow::Result;
use refgraph_cli::entrypoint;

fn main() -> Result<()> {
    print!("{}", entrypoint()?);
    Ok(())
}
