use std::path::{Path, PathBuf};

use scenario_runtime::scenario::{ScenarioDefinition, ScenarioError};

type Result<T> = std::result::Result<T, ScenarioFileError>;

#[derive(thiserror::Error, Debug)]
pub enum ScenarioFileError {
    #[error("Failed to read scenario file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid scenario file {0}: {1}")]
    InvalidScenarioFile(PathBuf, ScenarioError),

    #[error("Unsupported scenario file {0}: expected .json, .yaml or .yml")]
    UnsupportedExtension(PathBuf),
}

/// Read a scenario document, choosing the format by file extension
pub async fn load_scenario(path: impl AsRef<Path>) -> Result<ScenarioDefinition> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let parse = match extension.as_deref() {
        Some("json") => ScenarioDefinition::from_json,
        Some("yaml") | Some("yml") => ScenarioDefinition::from_yaml,
        _ => return Err(ScenarioFileError::UnsupportedExtension(path.to_path_buf())),
    };

    let content = tokio::fs::read_to_string(path).await?;
    let mut definition =
        parse(&content).map_err(|e| ScenarioFileError::InvalidScenarioFile(path.to_path_buf(), e))?;

    if definition.id.is_empty() {
        definition.id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
    }

    tracing::debug!("Loaded scenario {} with {} blocks", definition.id, definition.blocks.len());
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_load_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("greeting.yaml");
        std::fs::write(
            &yaml,
            "blocks:\n  - id: start\n    type: start\n    out_on_true: [log]\n  - id: log\n    type: log\n",
        )
        .unwrap();
        let definition = load_scenario(&yaml).await.unwrap();
        assert_eq!(definition.id, "greeting");
        assert_eq!(definition.blocks.len(), 2);

        let json = dir.path().join("other.json");
        std::fs::write(&json, r#"{"id": "named", "blocks": []}"#).unwrap();
        let definition = load_scenario(&json).await.unwrap();
        assert_eq!(definition.id, "named");
    }

    #[tokio::test]
    async fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();

        let txt = dir.path().join("flow.txt");
        std::fs::write(&txt, "").unwrap();
        assert!(matches!(
            load_scenario(&txt).await,
            Err(ScenarioFileError::UnsupportedExtension(_))
        ));

        assert!(matches!(
            load_scenario(dir.path().join("missing.json")).await,
            Err(ScenarioFileError::IoError(_))
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            load_scenario(&broken).await,
            Err(ScenarioFileError::InvalidScenarioFile(_, ScenarioError::Parse(_)))
        ));
    }
}
