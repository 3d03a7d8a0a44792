use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::info;
use validator::{Validate, ValidationError};

pub const DEFAULT_SERVICE_NAME: &str = "bluelizard";
pub const DEFAULT_OUTPUT: &str = "bh_template.json";
pub const DEFAULT_REGION: &str = "us-east-2";
pub const DEFAULT_AMI: &str = "ami-6a003c0f";

// `<service>InstanceRole` must fit the 128 character instance profile name limit.
const MAX_SERVICE_NAME_LENGTH: usize = 116;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputFile {
    pub location: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    #[validate(custom = "validate_service_name")]
    pub service_name: String,

    #[validate(custom = "validate_output_file")]
    pub output: OutputFile,

    /// Region to AMI id, rendered as the `RegionMap` mapping.
    #[validate(custom = "validate_region_map")]
    pub region_map: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: String::from(DEFAULT_SERVICE_NAME),
            output: OutputFile {
                location: PathBuf::from(DEFAULT_OUTPUT),
            },
            region_map: BTreeMap::from([(String::from(DEFAULT_REGION), String::from(DEFAULT_AMI))]),
        }
    }
}

pub fn parse(path: &Path) -> Result<Config, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let config: Config = match serde_yaml::from_str(&contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    match config.validate() {
        Ok(_) => (),
        Err(error) => return Err(Error::ValidationError(error.to_string())),
    }

    return Ok(config);
}

/// Like [`parse`], but a missing file means the built-in defaults.
pub fn load(path: &Path) -> Result<Config, Error> {
    match parse(path) {
        Err(Error::FileNotFound(location)) => {
            info!("No config at {}, using defaults", location);
            Ok(Config::default())
        }
        result => result,
    }
}

fn validate_service_name(service_name: &str) -> Result<(), ValidationError> {
    if service_name.is_empty() {
        return Err(ValidationError::new("The service name must not be empty"));
    }
    if !service_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::new(
            "The service name is part of logical ids and has to be alphanumeric",
        ));
    }
    if service_name.len() > MAX_SERVICE_NAME_LENGTH {
        return Err(ValidationError::new("The service name is too long"));
    }

    return Ok(());
}

fn validate_output_file(output_file: &OutputFile) -> Result<(), ValidationError> {
    let file_extension = match output_file.location.extension() {
        Some(extension) => extension,
        None => {
            return Err(ValidationError::new(
                "Unable to parse the extension of the output file location",
            ))
        }
    };
    if file_extension != "json" {
        return Err(ValidationError::new("The output file location has to end with `.json`"));
    }

    return Ok(());
}

fn validate_region_map(region_map: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if region_map.is_empty() {
        return Err(ValidationError::new("The region map needs at least one region"));
    }
    if region_map.values().any(|ami| !ami.starts_with("ami-")) {
        return Err(ValidationError::new("Every region has to map to an `ami-` id"));
    }

    return Ok(());
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;

    use super::load;
    use super::parse;
    use super::Config;
    use super::Error;
    use super::OutputFile;
    use tempfile::tempdir;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bh_config.yaml");

        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "{}", contents).unwrap();

        (dir, file_path)
    }

    #[test]
    fn file_does_not_exist() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bh_config.yaml");

        let result = parse(&file_path);
        assert_eq!(true, result.is_err());
        match result.err().unwrap() {
            Error::FileNotFound(_) => {}
            _ => panic!("Expected `FileNotFound` error"),
        }
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bh_config.yaml");

        let config = load(&file_path).unwrap();
        assert_eq!(Config::default(), config);
        assert_eq!("bluelizard", config.service_name);
        assert_eq!(PathBuf::from("bh_template.json"), config.output.location);
        assert_eq!(Some(&String::from("ami-6a003c0f")), config.region_map.get("us-east-2"));
    }

    #[test]
    fn file_wrong_format() {
        let (_dir, file_path) = write_config("Not yaml");

        let result = parse(&file_path);
        assert_eq!(true, result.is_err());
        match result.err().unwrap() {
            Error::ParsingError(_) => {}
            _ => panic!("Expected `ParsingError` error"),
        }
    }

    #[test]
    fn service_name_must_be_alphanumeric() {
        let config = Config {
            service_name: String::from("blue-lizard"),
            ..Default::default()
        };
        let (_dir, file_path) = write_config(&serde_yaml::to_string(&config).unwrap());

        let result = parse(&file_path);
        assert_eq!(true, result.is_err());
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn output_needs_a_known_extension() {
        let config = Config {
            output: OutputFile {
                location: PathBuf::from("template.txt"),
            },
            ..Default::default()
        };
        let (_dir, file_path) = write_config(&serde_yaml::to_string(&config).unwrap());

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn region_map_needs_ami_ids() {
        let config = Config {
            region_map: BTreeMap::from([(String::from("eu-west-1"), String::from("ubuntu"))]),
            ..Default::default()
        };
        let (_dir, file_path) = write_config(&serde_yaml::to_string(&config).unwrap());

        assert_eq!(true, matches!(parse(&file_path), Err(Error::ValidationError(_))));
    }

    #[test]
    fn parses_the_config() {
        let config = Config {
            service_name: String::from("acme"),
            output: OutputFile {
                location: PathBuf::from("acme.json"),
            },
            region_map: BTreeMap::from([
                (String::from("us-east-2"), String::from("ami-6a003c0f")),
                (String::from("eu-west-1"), String::from("ami-0a8e758f5e873d1c1")),
            ]),
        };
        let (_dir, file_path) = write_config(&serde_yaml::to_string(&config).unwrap());

        let result = parse(&file_path);
        assert_eq!(Ok(config), result);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let (_dir, file_path) = write_config("service_name: acme");

        let config = parse(&file_path).unwrap();
        assert_eq!("acme", config.service_name);
        assert_eq!(PathBuf::from("bh_template.json"), config.output.location);
        assert_eq!(1, config.region_map.len());
    }

    #[test]
    fn misspelled_key_is_rejected() {
        let (_dir, file_path) = write_config("servce_name: acme");

        let result = parse(&file_path);
        assert_eq!(true, result.is_err());
        match result.err().unwrap() {
            Error::ParsingError(_) => {}
            _ => panic!("Expected `ParsingError` error"),
        }
    }

    #[test]
    fn output_without_extension_is_rejected() {
        let config = Config {
            output: OutputFile {
                location: PathBuf::from("bh_template"),
            },
            ..Default::default()
        };
        let (_dir, file_path) = write_config(&serde_yaml::to_string(&config).unwrap());

        assert_eq!(true, matches!(parse(&file_path), Err(Error::ValidationError(_))));
    }
}
