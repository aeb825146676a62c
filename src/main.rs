#![allow(non_snake_case)]
use RustedSolverFramework::Examples::ie_examples::ie_examples;
use std::path::PathBuf;

/// usage: RustedSolverFramework [example number] [log directory]
fn main() {
    let mut args = std::env::args().skip(1);
    let example = args.next().and_then(|a| a.parse::<usize>().ok()).unwrap_or(2);
    let log_dir = args.next().map(PathBuf::from);
    ie_examples(example, log_dir.as_deref());
}
