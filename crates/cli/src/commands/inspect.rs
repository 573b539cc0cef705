//! Inspect Command

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use chappie_common::Collection;
use chappie_engine::traverse::{plan, PlannedLeaf};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Collection file to list
    pub collection: PathBuf,
}

/// One leaf as shown by `inspect`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafDisplay {
    pub order: usize,
    pub test_id: String,
    pub folder: String,
    pub method: String,
    pub url: String,
    pub has_tests: bool,
}

impl LeafDisplay {
    fn new(order: usize, leaf: &PlannedLeaf<'_>) -> Self {
        let request = &leaf.item.request;
        Self {
            order,
            test_id: leaf.test_id.clone(),
            folder: leaf.folder.clone(),
            method: request.method.to_string(),
            url: request.url.clone(),
            has_tests: request.test_source().is_some(),
        }
    }
}

impl TableDisplay for LeafDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Test ID", "Folder", "Method", "URL", "Tests"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.order.to_string(),
            self.test_id.clone(),
            self.folder.clone(),
            self.method.clone(),
            self.url.clone(),
            if self.has_tests { "yes" } else { "-" }.to_string(),
        ]
    }
}

/// Leaves of `collection` in the order a run visits them
pub fn leaves(collection: &Collection) -> Vec<LeafDisplay> {
    plan(&collection.items)
        .iter()
        .enumerate()
        .map(|(i, leaf)| LeafDisplay::new(i + 1, leaf))
        .collect()
}

pub fn execute(args: InspectArgs, format: OutputFormat) -> Result<()> {
    let collection = Collection::load(&args.collection)
        .with_context(|| format!("Could not read collection {}", args.collection.display()))?;
    print_list(&leaves(&collection), format);
    Ok(())
}
