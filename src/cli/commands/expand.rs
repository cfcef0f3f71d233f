//! `simreg expand`: show what a test list expands to.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::TestSpec;
use crate::services::test_list;

#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Test list file
    pub test_list: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ExpandOutput {
    pub test_list: String,
    pub total: usize,
    pub runs: Vec<TestSpec>,
}

impl CommandOutput for ExpandOutput {
    fn to_human(&self) -> String {
        format!(
            "{} expands to {} run(s):\n\n{}",
            self.test_list,
            self.total,
            TableFormatter::new().format_specs(&self.runs)
        )
    }
}

pub fn execute(args: &ExpandArgs, json: bool) -> Result<i32> {
    let runs = test_list::load(&args.test_list)?;
    output(
        &ExpandOutput {
            test_list: args.test_list.display().to_string(),
            total: runs.len(),
            runs,
        },
        json,
    );
    Ok(0)
}
