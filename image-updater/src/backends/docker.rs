use anyhow::{anyhow, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap as Map,
    ffi::OsStr,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

use crate::{
    backends::ContextArchive,
    errors::UpdateError,
    models::{ImageId, ImageName, ImageSpec, LayerId},
    services::ContainerBackend,
};

const NONE: &str = "<none>";

/// One line of `docker image ls --format '{{json .}}'`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageListEntry {
    pub repository: String,
    pub tag: String,
    #[serde(rename = "ID")]
    pub id: String,
}

/// Talks to the daemon through the `docker` command line client.
pub struct DockerBackend {
    program: PathBuf,
    api_version: String,
}

impl DockerBackend {
    pub fn new<P, V>(program: P, api_version: V) -> DockerBackend
    where
        P: Into<PathBuf>,
        V: Into<String>,
    {
        DockerBackend {
            program: program.into(),
            api_version: api_version.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .env("DOCKER_API_VERSION", &self.api_version)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    /// Runs `command` to completion, turning a non-zero exit into an error
    /// carrying its stderr.
    fn run(&self, operation: &str, mut command: Command) -> Result<Output, UpdateError> {
        debug!("running {:?}", command);

        let output = command
            .output()
            .map_err(|err| UpdateError::collaborator(operation, err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UpdateError::collaborator(
                operation,
                format!("{} ({})", stderr.trim(), output.status),
            ));
        }

        Ok(output)
    }
}

impl ContainerBackend for DockerBackend {
    fn pull_image(&mut self, name: &ImageName) -> Result<()> {
        let command = self.command(&["pull", "--quiet", name.0.as_str()]);
        self.run(&format!("pull {}", name), command)?;

        Ok(())
    }

    fn list_images(&mut self) -> Result<Map<ImageName, ImageId>> {
        let command = self.command(&["image", "ls", "--no-trunc", "--format", "{{json .}}"]);
        let output = self.run("list images", command)?;

        parse_image_list(&String::from_utf8_lossy(&output.stdout))
    }

    fn inspect_image(&mut self, reference: &str) -> Result<Vec<LayerId>> {
        let command = self.command(&[
            "image",
            "inspect",
            "--format",
            "{{json .RootFS.Layers}}",
            reference,
        ]);
        let output = self.run(&format!("inspect {}", reference), command)?;

        let layers: Option<Vec<String>> = serde_json::from_slice(&output.stdout)
            .map_err(|err| UpdateError::collaborator(format!("inspect {}", reference), err))?;

        Ok(layers
            .unwrap_or_default()
            .into_iter()
            .map(LayerId)
            .collect())
    }

    fn build_image(&mut self, spec: &ImageSpec) -> Result<ImageId> {
        let image = spec.image();
        let build_error = |reason: String| UpdateError::Build {
            image: image.0.clone(),
            reason,
        };

        let context = spec
            .dockerfile
            .parent()
            .map(|dir| if dir.as_os_str().is_empty() { Path::new(".") } else { dir })
            .ok_or_else(|| build_error(format!("{:?} has no parent directory", spec.dockerfile)))?;
        let dockerfile = spec
            .dockerfile
            .file_name()
            .ok_or_else(|| build_error(format!("{:?} is not a file", spec.dockerfile)))?;

        let archive = ContextArchive::pack(context)?;
        debug!(
            "sending build context {:?} ({} bytes)",
            archive.path(),
            archive.size()
        );

        let mut command = self.command(&[
            OsStr::new("build"),
            OsStr::new("--quiet"),
            OsStr::new("--tag"),
            OsStr::new(&image.0),
            OsStr::new("--file"),
            dockerfile,
            OsStr::new("-"),
        ]);
        command.stdin(archive.open()?);

        let output = self
            .run(&format!("build {}", image), command)
            .map_err(|err| match err {
                UpdateError::Collaborator { reason, .. } => build_error(reason),
                other => other,
            });

        // Remove the archive before looking at the result so that a failed
        // build doesn't leave it behind.
        archive.close()?;
        let output = output?;

        let id = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if id.is_empty() {
            return Err(anyhow!("docker build didn't report an image id for {}", image));
        }

        Ok(ImageId(id))
    }
}

fn parse_image_list(stdout: &str) -> Result<Map<ImageName, ImageId>> {
    let mut images = Map::new();

    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let entry: ImageListEntry = serde_json::from_str(line)
            .map_err(|err| UpdateError::collaborator("list images", err))?;

        if entry.repository == NONE || entry.tag == NONE {
            continue;
        }

        images.insert(
            ImageName(format!("{}:{}", entry.repository, entry.tag)),
            ImageId(entry.id),
        );
    }

    Ok(images)
}
