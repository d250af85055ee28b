use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value as Json;
use tracing::debug;

use graphdelta_diff::{diff, ValueDiff};
use graphdelta_settings::{Settings, SettingsConfig};

use crate::cli::*;
use crate::load::{self, Schema};

pub fn run_command(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Diff(args) => cmd_diff(args, cli.format),
        Command::Config(args) => cmd_config(args, cli.format),
    }
}

fn load_config(args: &SettingsArgs) -> Result<SettingsConfig> {
    let mut config = match &args.settings {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading settings from {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing settings in {}", path.display()))?
        }
        None => SettingsConfig::default(),
    };
    if let Some(policy) = args.policy {
        config.reference_handling = policy.into();
    }
    Ok(config)
}

fn cmd_diff(args: DiffArgs, format: OutputFormat) -> Result<ExitCode> {
    let config = load_config(&args.settings)?;
    let left = load::read_document(&args.left)?;
    let right = load::read_document(&args.right)?;
    let result = diff_documents(&left, &right, config)?;
    let output = match format {
        OutputFormat::Text => render_text(result.as_ref()),
        OutputFormat::Json => render_json(result.as_ref())?,
    };
    print!("{output}");
    Ok(if result.is_some() { ExitCode::from(1) } else { ExitCode::SUCCESS })
}

/// Diff two JSON documents under `config`. `None` means the graphs are equal.
pub fn diff_documents(left: &Json, right: &Json, config: SettingsConfig) -> Result<Option<ValueDiff>> {
    let schema = Schema::infer([left, right]);
    debug!(types = schema.len(), policy = %config.reference_handling, "inferred document types");
    let x = schema.materialize(left)?;
    let y = schema.materialize(right)?;
    let settings = Arc::new(Settings::from_config(config));
    Ok(diff(&x, &y, &settings)?)
}

fn render_text(result: Option<&ValueDiff>) -> String {
    let Some(diff) = result else {
        return format!("{} No differences.\n", "✓".green().bold());
    };
    let count = diff.leaves().len();
    let noun = if count == 1 { "difference" } else { "differences" };
    format!("{} {count} {noun}\n{diff}", "✗".red().bold())
}

fn render_json(result: Option<&ValueDiff>) -> Result<String> {
    let leaves = result.map(ValueDiff::leaves).unwrap_or_default();
    Ok(serde_json::to_string_pretty(&leaves)? + "\n")
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> Result<ExitCode> {
    let config = load_config(&args.settings)?;
    let output = match format {
        OutputFormat::Text => toml::to_string_pretty(&config)?,
        OutputFormat::Json => serde_json::to_string_pretty(&config)? + "\n",
    };
    print!("{output}");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use graphdelta_types::ReferenceHandling;

    use super::*;

    #[test]
    fn equal_documents_have_no_diff() {
        let doc = json!({"name": "a", "owner": {"age": 3}, "tags": ["x"]});
        let result = diff_documents(&doc, &doc.clone(), SettingsConfig::default()).unwrap();
        assert!(result.is_none());
        assert!(render_text(None).contains("No differences."));
        assert_eq!(render_json(None).unwrap(), "[]\n");
    }

    #[test]
    fn nested_difference_is_reported_by_route() {
        let left = json!({"name": "a", "owner": {"age": 3}});
        let right = json!({"owner": {"age": 2}, "name": "a"});
        let diff = diff_documents(&left, &right, SettingsConfig::default())
            .unwrap()
            .unwrap();

        let leaves = diff.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, "owner.age");

        let text = render_text(Some(&diff));
        assert!(text.contains("1 difference\n"));
        assert!(text.ends_with("Document\n  owner\n    age x: 3 y: 2\n"));

        let listed: Json = serde_json::from_str(&render_json(Some(&diff)).unwrap()).unwrap();
        assert_eq!(listed, json!([{"path": "owner.age", "x": 3, "y": 2}]));
    }

    #[test]
    fn list_items_are_padded_with_missing() {
        let left = json!({"tags": ["a", "b"]});
        let right = json!({"tags": ["a"]});
        let diff = diff_documents(&left, &right, SettingsConfig::default())
            .unwrap()
            .unwrap();
        let leaves = diff.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, "tags[1]");
        assert!(leaves[0].y.is_missing());
    }

    #[test]
    fn references_only_compares_nested_objects_by_identity() {
        let doc = json!({"owner": {"age": 3}});
        let config = SettingsConfig::with_reference_handling(ReferenceHandling::ReferencesOnly);
        let diff = diff_documents(&doc, &doc.clone(), config).unwrap().unwrap();
        assert_eq!(diff.leaves()[0].path, "owner");
    }

    #[test]
    fn ignored_members_are_skipped() {
        let left = json!({"name": "a", "stamp": 1});
        let right = json!({"name": "a", "stamp": 2});
        let config = SettingsConfig {
            ignored_members: vec!["Document.stamp".into()],
            ..Default::default()
        };
        assert!(diff_documents(&left, &right, config).unwrap().is_none());
    }

    #[test]
    fn mismatched_roots_are_errors() {
        let left = json!({"a": 1});
        let right = json!([1]);
        assert!(diff_documents(&left, &right, SettingsConfig::default()).is_err());
    }
}
