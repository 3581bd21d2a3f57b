// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{Error, Result},
    handle::Image,
    ops::Transform,
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, str::FromStr};
use tracing::{trace, trace_span};

/// Ordered list of transforms, serialized as a plain JSON array.
///
/// ```
/// use cvbind::{ops::Transform, pipeline::Pipeline};
///
/// let pipeline: Pipeline = r#"[{"transform":"gray"},{"transform":"canny","threshold1":50,"threshold2":150}]"#
///     .parse()
///     .unwrap();
/// assert_eq!(pipeline.len(), 2);
/// assert_eq!(pipeline.steps()[0], Transform::Gray);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline(Vec<Transform>);

impl Pipeline {
    pub fn new(steps: Vec<Transform>) -> Self {
        Self(steps)
    }

    /// Reads a JSON pipeline file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        json.parse()
    }

    pub fn steps(&self) -> &[Transform] {
        &self.0
    }

    pub fn push(&mut self, op: Transform) {
        self.0.push(op);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies every step in order and returns the final image.
    ///
    /// Intermediate images are disposed as soon as the next step exists. The
    /// input is never modified or disposed, and the result is always a new
    /// handle, so an empty pipeline returns a copy.
    pub fn run(&self, src: &Image) -> Result<Image> {
        let _span = trace_span!("pipeline", steps = self.0.len()).entered();
        let Some((first, rest)) = self.0.split_first() else {
            return src.copy();
        };

        let mut current = src.transform(first)?;
        trace!("{} -> {current}", first.name());
        for op in rest {
            let next = current.transform(op)?;
            current.dispose();
            current = next;
            trace!("{} -> {current}", op.name());
        }
        Ok(current)
    }
}

impl FromStr for Pipeline {
    type Err = Error;

    fn from_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<Vec<Transform>> for Pipeline {
    fn from(steps: Vec<Transform>) -> Self {
        Self(steps)
    }
}

impl FromIterator<Transform> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Transform>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
