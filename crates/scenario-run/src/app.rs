use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;

use crate::executor::ExecutorOptions;

#[derive(Parser, Debug)]
#[command(about = "Run a block scenario with the built-in node types")]
pub struct Args {
    /// Scope the results are stored under
    #[arg(long, default_value = scenario_runtime::node::DEFAULT_SCOPE)]
    pub scope: String,

    /// Results file: previous results are read from it and the new ones written back
    #[arg(long, value_name = "FILE")]
    pub results: Option<PathBuf>,

    /// Stop the run at the first block that fails
    #[arg(long)]
    pub halt_on_error: bool,

    /// Seed a run variable; VALUE is parsed as JSON and falls back to a string
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, Value)>,

    /// Path to a .json, .yaml or .yml scenario file
    pub scenario: PathBuf,
}

impl Args {
    pub fn options(&self) -> ExecutorOptions {
        ExecutorOptions {
            scope: self.scope.clone(),
            results: self.results.clone(),
            halt_on_error: self.halt_on_error,
            variables: self.vars.clone(),
        }
    }
}

fn parse_var(input: &str) -> Result<(String, Value), String> {
    let (name, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {input:?}"))?;

    let name = name.trim();
    if name.is_empty() {
        return Err("variable name cannot be empty".to_string());
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(parse_var("count=3").unwrap(), ("count".to_string(), json!(3)));
        assert_eq!(parse_var("flag=true").unwrap(), ("flag".to_string(), json!(true)));
        assert_eq!(parse_var("name=alice").unwrap(), ("name".to_string(), json!("alice")));
        assert_eq!(parse_var("eq=a=b").unwrap(), ("eq".to_string(), json!("a=b")));
        assert_eq!(parse_var("empty=").unwrap(), ("empty".to_string(), json!("")));

        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=1").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from([
            "scenario-run",
            "--scope",
            "nightly",
            "--var",
            "x=1",
            "--var",
            "y=two",
            "--halt-on-error",
            "flow.yaml",
        ]);

        let options = args.options();
        assert_eq!(options.scope, "nightly");
        assert!(options.halt_on_error);
        assert_eq!(options.results, None);
        assert_eq!(
            options.variables,
            vec![("x".to_string(), json!(1)), ("y".to_string(), json!("two"))]
        );
        assert_eq!(args.scenario, PathBuf::from("flow.yaml"));
    }
}
