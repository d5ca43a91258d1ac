use anyhow::Result;
use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use crate::models::ImageName;

/// Returns the image referenced by the first `FROM` instruction in the
/// Dockerfile at `path`, if there is one.
pub fn base_image<P: AsRef<Path>>(path: P) -> Result<Option<ImageName>> {
    let file = File::open(path.as_ref())?;
    read_base_image(file)
}

pub fn read_base_image<R: Read>(reader: R) -> Result<Option<ImageName>> {
    for line in BufReader::new(reader).lines() {
        let line = line?;
        let mut words = line.split_whitespace();

        match words.next() {
            Some(keyword) if keyword.eq_ignore_ascii_case("FROM") => (),
            _ => continue,
        }

        // `FROM [--platform=<platform>] <image> [AS <name>]`
        let image = words.find(|word| !word.starts_with("--"));
        if let Some(image) = image {
            return Ok(Some(ImageName::normalized(image)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(dockerfile: &str) -> Option<String> {
        read_base_image(dockerfile.as_bytes())
            .unwrap()
            .map(|name| name.0)
    }

    #[test]
    fn first_from_wins() {
        let dockerfile = "\
# syntax=docker/dockerfile:1
FROM golang:1.21 AS build
RUN go build ./...

FROM debian:stable
COPY --from=build /app /app
";
        assert_eq!(parse(dockerfile).as_deref(), Some("golang:1.21"));
    }

    #[test]
    fn keyword_is_case_insensitive_and_flags_are_skipped() {
        assert_eq!(
            parse("  from --platform=linux/amd64 base:1.0\n").as_deref(),
            Some("base:1.0")
        );
    }

    #[test]
    fn untagged_base_gets_latest() {
        assert_eq!(parse("FROM alpine\n").as_deref(), Some("alpine:latest"));
        assert_eq!(parse("FROM scratch\n").as_deref(), Some("scratch"));
    }

    #[test]
    fn missing_from() {
        assert_eq!(parse("RUN true\nFROM\n"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile");
        std::fs::write(&path, "FROM base:1.0\n").unwrap();

        assert_eq!(base_image(&path).unwrap(), Some(ImageName("base:1.0".into())));
        assert!(base_image(dir.path().join("missing")).is_err());
    }
}
