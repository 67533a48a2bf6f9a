// ABOUTME: Container image reference parsing and validation.
// ABOUTME: Handles formats like nginx, nginx:1.25, repo/image:tag@digest.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0:?}")]
    InvalidChar(char),

    #[error("image reference has an empty name: {0}")]
    EmptyName(String),
}

/// A validated image reference: `name[:tag][@digest]`.
///
/// Any registry component stays part of `name`; the create command passes the
/// reference through verbatim, so no registry-aware splitting is needed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        if let Some(bad) = input
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !"/:.-_@".contains(*c))
        {
            return Err(ParseImageRefError::InvalidChar(bad));
        }

        let (rest, digest) = match input.split_once('@') {
            Some((before, after)) => (before, Some(after.to_string())),
            None => (input, None),
        };

        // A colon only introduces a tag when it appears after the last slash;
        // earlier colons belong to a registry port.
        let (name, tag) = match rest.rsplit_once(':') {
            Some((before, after)) if !after.contains('/') => {
                (before.to_string(), Some(after.to_string()))
            }
            _ => (rest.to_string(), None),
        };

        if name.is_empty() {
            return Err(ParseImageRefError::EmptyName(input.to_string()));
        }

        Ok(Self { name, tag, digest })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The same image under a different tag, dropping any digest.
    pub fn tagged(&self, tag: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
