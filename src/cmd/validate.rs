//! `tapwire validate`: check a configuration file for errors.
//!
//! Parses and validates the config file, reporting results in either
//! human-readable text or machine-readable JSON format.

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::config::model::Config;
use crate::config::sources::parse_config_str;
use crate::config::validation;
use crate::error::TapwireError;

pub fn execute(args: &ValidateArgs) -> Result<(), TapwireError> {
    let path = &args.config;

    if !path.exists() {
        return Err(TapwireError::ConfigFileNotFound { path: path.clone() });
    }

    let content = std::fs::read_to_string(path)?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = parse_config_str(ext, &content, &path.display().to_string())?;

    if let Err(errors) = validation::validate(&config) {
        match args.format {
            ValidateFormat::Text => {
                eprintln!("\u{2717} {} has {} errors\n", path.display(), errors.len());
                for error in &errors {
                    eprintln!("{error}");
                }
            }
            ValidateFormat::Json => {
                let json_errors: Vec<serde_json::Value> = errors
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "route": e.route,
                            "field": e.field,
                            "message": e.message,
                            "suggestion": e.suggestion,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "valid": false,
                        "errors": json_errors,
                    })
                );
            }
        }
        return Err(TapwireError::ConfigValidation { errors });
    }

    match args.format {
        ValidateFormat::Text => {
            println!(
                "\u{2713} {}",
                validation::format_validation_report(&path.display().to_string(), &config)
            );
        }
        ValidateFormat::Json => println!("{}", valid_report_json(&config)),
    }

    Ok(())
}

fn valid_report_json(config: &Config) -> serde_json::Value {
    let duplicates = validation::duplicate_patterns(config);
    let duplicates: Vec<&str> = duplicates
        .iter()
        .map(|(pattern, _)| pattern.as_str())
        .collect();
    let defaults = &config.defaults;
    serde_json::json!({
        "valid": true,
        "routes": config.routes.len(),
        "duplicates": duplicates,
        "methods": defaults.methods,
        "body_methods": defaults.body_methods,
        "no_route_status": defaults.no_route_status,
        "timeout_ms": defaults.timeout,
        "tenant_param": defaults.tenant_param,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{Defaults, Route};

    fn route(path: &str) -> Route {
        Route {
            path: path.into(),
            upstream: "https://api.openai.com".into(),
        }
    }

    #[test]
    fn json_report_lists_duplicates_and_request_settings() {
        let config = Config {
            defaults: Defaults {
                tenant_param: Some("institution".into()),
                ..Defaults::default()
            },
            routes: vec![route("/v1"), route("/v1/")],
        };
        let report = valid_report_json(&config);
        assert_eq!(report["routes"], 2);
        assert_eq!(report["duplicates"], serde_json::json!(["/v1/"]));
        assert_eq!(report["body_methods"], serde_json::json!(["POST", "PUT"]));
        assert_eq!(report["tenant_param"], "institution");
        assert_eq!(report["no_route_status"], 404);
        assert!(report["timeout_ms"].is_null());
    }
}
