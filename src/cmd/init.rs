//! `tapwire init`: generate a starter configuration file.
//!
//! Writes a YAML, JSON, or TOML config with either a minimal or a fully
//! documented template. Existing files are never overwritten.

use std::path::PathBuf;

use crate::cli::{ConfigFormat, InitArgs};
use crate::error::TapwireError;

pub fn execute(args: &InitArgs) -> Result<(), TapwireError> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("tapwire.{}", args.format.extension())));

    if output.exists() {
        return Err(TapwireError::FileExists { path: output });
    }

    std::fs::write(&output, template(&args.format, args.full))?;
    println!("Created {}", output.display());
    Ok(())
}

#[must_use]
pub fn template(format: &ConfigFormat, full: bool) -> &'static str {
    match (format, full) {
        (ConfigFormat::Yaml, false) => YAML_MINIMAL,
        (ConfigFormat::Yaml, true) => YAML_FULL,
        (ConfigFormat::Json, false) => JSON_MINIMAL,
        (ConfigFormat::Json, true) => JSON_FULL,
        (ConfigFormat::Toml, false) => TOML_MINIMAL,
        (ConfigFormat::Toml, true) => TOML_FULL,
    }
}

const YAML_MINIMAL: &str = r#"# Tapwire config

routes:
  - path: "/"
    upstream: "https://api.openai.com"
  - path: "/backend-api/conversation"
    upstream: "https://chat.openai.com"
"#;

const YAML_FULL: &str = r#"# Tapwire config
#
# All values under `defaults` are the built-in defaults.

defaults:
  # Inbound methods accepted; anything else gets 405.
  methods: ["GET", "POST", "PUT", "DELETE"]
  # Methods whose body is parsed as JSON and forwarded.
  body_methods: ["POST", "PUT"]
  # Upstream header timeout in milliseconds. Omit to use transport defaults.
  # timeout: 30000
  # Status returned when no route matches.
  no_route_status: 404
  # Extra headers dropped in both directions, on top of the built-in list.
  strip_headers: []
  # Query parameter moved out of the forwarded URL into the exchange log.
  # tenant_param: "institution"

# Routes are matched segment by segment. A literal segment beats `*`, and
# matching stops at the first segment with no child. Later duplicates win.
routes:
  - path: "/"
    upstream: "https://api.openai.com"

  - path: "/backend-api/conversation"
    upstream: "https://chat.openai.com"

  # - path: "/v1/*/files"
  #   upstream: "https://files.example.com"
"#;

const JSON_MINIMAL: &str = r#"{
  "routes": [
    { "path": "/", "upstream": "https://api.openai.com" },
    { "path": "/backend-api/conversation", "upstream": "https://chat.openai.com" }
  ]
}
"#;

const JSON_FULL: &str = r#"{
  "defaults": {
    "methods": ["GET", "POST", "PUT", "DELETE"],
    "body_methods": ["POST", "PUT"],
    "timeout": 30000,
    "no_route_status": 404,
    "strip_headers": [],
    "tenant_param": "institution"
  },
  "routes": [
    { "path": "/", "upstream": "https://api.openai.com" },
    { "path": "/backend-api/conversation", "upstream": "https://chat.openai.com" }
  ]
}
"#;

const TOML_MINIMAL: &str = r#"# Tapwire config

[[routes]]
path = "/"
upstream = "https://api.openai.com"

[[routes]]
path = "/backend-api/conversation"
upstream = "https://chat.openai.com"
"#;

const TOML_FULL: &str = r#"# Tapwire config
#
# All values under [defaults] are the built-in defaults.

[defaults]
methods = ["GET", "POST", "PUT", "DELETE"]
body_methods = ["POST", "PUT"]
# timeout = 30000
no_route_status = 404
strip_headers = []
# tenant_param = "institution"

# Later duplicates win; a literal segment beats `*`.
[[routes]]
path = "/"
upstream = "https://api.openai.com"

[[routes]]
path = "/backend-api/conversation"
upstream = "https://chat.openai.com"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::Config;
    use crate::config::validation::validate;

    #[cfg(feature = "yaml")]
    #[test]
    fn yaml_templates_are_valid() {
        for full in [false, true] {
            let config: Config = serde_yml::from_str(template(&ConfigFormat::Yaml, full)).unwrap();
            assert!(validate(&config).is_ok());
            assert_eq!(config.routes.len(), 2);
        }
    }

    #[test]
    fn json_templates_are_valid() {
        for full in [false, true] {
            let config: Config =
                serde_json::from_str(template(&ConfigFormat::Json, full)).unwrap();
            assert!(validate(&config).is_ok());
        }
    }

    #[cfg(feature = "toml")]
    #[test]
    fn toml_templates_are_valid() {
        for full in [false, true] {
            let config: Config = toml::from_str(template(&ConfigFormat::Toml, full)).unwrap();
            assert!(validate(&config).is_ok());
        }
    }

    #[test]
    fn refuses_to_overwrite() {
        let path = std::env::temp_dir().join(format!("tapwire-init-{}.yaml", std::process::id()));
        std::fs::write(&path, "existing").unwrap();
        let args = InitArgs {
            format: ConfigFormat::Yaml,
            output: Some(path.clone()),
            full: false,
        };
        assert!(matches!(execute(&args), Err(TapwireError::FileExists { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing");
        std::fs::remove_file(path).unwrap();
    }
}
