use anyhow::{anyhow, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap as Map, BTreeSet as Set},
    fs,
    path::{Path, PathBuf},
};

use crate::{
    dockerfile,
    errors::UpdateError,
    models::ImageSpec,
    services::ConfigFrontend,
};

/// One `[images.<key>]` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageEntry {
    pub name: String,

    #[serde(default = "default_tag")]
    pub tag: String,

    pub dockerfile: PathBuf,
}

fn default_tag() -> String {
    "latest".into()
}

/// Entries are kept as raw values so that one bad entry doesn't fail the
/// whole file.
#[derive(Clone, Debug, Deserialize)]
struct TomlConfigFile {
    #[serde(default)]
    images: Map<String, toml::Value>,
}

#[derive(Clone, Debug, Deserialize)]
struct YamlConfigFile {
    #[serde(default)]
    images: Map<String, serde_yaml::Value>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Format {
    Toml,
    Yaml,
}

impl Format {
    fn of(path: &Path) -> Format {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("yml") | Some("yaml") => Format::Yaml,
            _ => Format::Toml,
        }
    }
}

/// Reads image definitions from a TOML or YAML file.
pub struct ImageConfigFrontend {
    warnings: Vec<UpdateError>,
}

impl ImageConfigFrontend {
    pub fn new() -> ImageConfigFrontend {
        ImageConfigFrontend {
            warnings: Vec::new(),
        }
    }

    /// Definitions skipped by the last call to `image_specs`.
    pub fn warnings(&self) -> &[UpdateError] {
        &self.warnings
    }

    fn decode_entries(path: &Path, contents: &str) -> Result<Vec<(String, Result<ImageEntry>)>> {
        let config_error = |reason: String| UpdateError::Config {
            path: path.to_owned(),
            reason,
        };

        let entries: Vec<(String, Result<ImageEntry>)> = match Format::of(path) {
            Format::Toml => {
                let file: TomlConfigFile =
                    toml::from_str(contents).map_err(|err| config_error(err.to_string()))?;
                file.images
                    .into_iter()
                    .map(|(key, value)| {
                        let entry = value.try_into::<ImageEntry>();
                        (key, entry.map_err(|err| anyhow!("{}", err)))
                    })
                    .collect()
            }
            Format::Yaml => {
                let file: YamlConfigFile =
                    serde_yaml::from_str(contents).map_err(|err| config_error(err.to_string()))?;
                file.images
                    .into_iter()
                    .map(|(key, value)| {
                        let entry = serde_yaml::from_value::<ImageEntry>(value);
                        (key, entry.map_err(Into::into))
                    })
                    .collect()
            }
        };

        Ok(entries)
    }

    fn load_entry(
        base_dir: &Path,
        key: &str,
        entry: Result<ImageEntry>,
    ) -> Result<ImageSpec, UpdateError> {
        let spec_error = |reason: String| UpdateError::Spec {
            key: key.to_owned(),
            reason,
        };

        let entry = entry.map_err(|err| spec_error(err.to_string()))?;

        let dockerfile = if entry.dockerfile.is_absolute() {
            entry.dockerfile
        } else {
            base_dir.join(entry.dockerfile)
        };

        let base_image = dockerfile::base_image(&dockerfile)
            .map_err(|err| spec_error(format!("{:?}: {}", dockerfile, err)))?
            .ok_or_else(|| spec_error(format!("{:?} has no FROM instruction", dockerfile)))?;

        Ok(ImageSpec::new(entry.name, entry.tag, base_image, dockerfile))
    }
}

impl ConfigFrontend for ImageConfigFrontend {
    fn image_specs(&mut self, config_path: &Path) -> Result<Vec<ImageSpec>> {
        self.warnings.clear();

        let contents = fs::read_to_string(config_path).map_err(|err| UpdateError::Config {
            path: config_path.to_owned(),
            reason: err.to_string(),
        })?;

        let base_dir = config_path.parent().unwrap_or_else(|| Path::new(""));
        let mut specs = Vec::new();
        let mut seen = Set::new();

        for (key, entry) in Self::decode_entries(config_path, &contents)? {
            let spec = Self::load_entry(base_dir, &key, entry).and_then(|spec| {
                if seen.insert(spec.image()) {
                    Ok(spec)
                } else {
                    Err(UpdateError::Spec {
                        key: key.clone(),
                        reason: format!("{} is already defined", spec.image()),
                    })
                }
            });

            match spec {
                Ok(spec) => {
                    info!("loaded {} from {:?} (FROM {})", spec.image(), key, spec.base_image);
                    specs.push(spec);
                }
                Err(err) => {
                    warn!("error processing {:?} record: {}", key, err);
                    self.warnings.push(err);
                }
            }
        }

        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, contents) in files {
            let path = dir.path().join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        dir
    }

    fn images(specs: &[ImageSpec]) -> Vec<(String, String)> {
        specs
            .iter()
            .map(|spec| (spec.image().0, spec.base_image.0.clone()))
            .collect()
    }

    #[test]
    fn reads_toml_definitions() {
        let dir = project(&[
            (
                "images.toml",
                r#"
[images.base]
name = "base"
tag = "1.0"
dockerfile = "base/Dockerfile"

[images.app]
name = "app"
dockerfile = "app/Dockerfile"
"#,
            ),
            ("base/Dockerfile", "FROM debian:stable\n"),
            ("app/Dockerfile", "FROM base:1.0\nRUN true\n"),
        ]);

        let mut frontend = ImageConfigFrontend::new();
        let specs = frontend.image_specs(&dir.path().join("images.toml")).unwrap();

        assert_eq!(
            images(&specs),
            vec![
                ("app:latest".to_string(), "base:1.0".to_string()),
                ("base:1.0".to_string(), "debian:stable".to_string()),
            ]
        );
        assert_eq!(specs[0].dockerfile, dir.path().join("app/Dockerfile"));
        assert!(frontend.warnings().is_empty());
    }

    #[test]
    fn reads_yaml_definitions() {
        let dir = project(&[
            (
                "images.yaml",
                "images:\n  tool:\n    name: tool\n    tag: \"2\"\n    dockerfile: Dockerfile\n",
            ),
            ("Dockerfile", "FROM alpine\n"),
        ]);

        let mut frontend = ImageConfigFrontend::new();
        let specs = frontend.image_specs(&dir.path().join("images.yaml")).unwrap();

        assert_eq!(
            images(&specs),
            vec![("tool:2".to_string(), "alpine:latest".to_string())]
        );
    }

    #[test]
    fn bad_entries_are_skipped_with_a_warning() {
        let dir = project(&[
            (
                "images.toml",
                r#"
[images.a_missing]
name = "missing"
dockerfile = "missing/Dockerfile"

[images.b_malformed]
name = "malformed"

[images.c_nofrom]
name = "nofrom"
dockerfile = "nofrom/Dockerfile"

[images.d_ok]
name = "ok"
tag = "1"
dockerfile = "ok/Dockerfile"

[images.e_duplicate]
name = "ok"
tag = "1"
dockerfile = "ok/Dockerfile"
"#,
            ),
            ("nofrom/Dockerfile", "RUN true\n"),
            ("ok/Dockerfile", "FROM scratch\n"),
        ]);

        let mut frontend = ImageConfigFrontend::new();
        let specs = frontend.image_specs(&dir.path().join("images.toml")).unwrap();

        assert_eq!(images(&specs), vec![("ok:1".to_string(), "scratch".to_string())]);

        let skipped: Vec<_> = frontend
            .warnings()
            .iter()
            .map(|warning| match warning {
                UpdateError::Spec { key, .. } => key.as_str(),
                other => panic!("unexpected warning {:?}", other),
            })
            .collect();
        assert_eq!(skipped, vec!["a_missing", "b_malformed", "c_nofrom", "e_duplicate"]);
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let dir = project(&[("images.toml", "[images\nname = ")]);
        let mut frontend = ImageConfigFrontend::new();

        let err = frontend
            .image_specs(&dir.path().join("images.toml"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::Config { .. })
        ));

        let err = frontend
            .image_specs(&dir.path().join("absent.toml"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::Config { .. })
        ));
    }
}
