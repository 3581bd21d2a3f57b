// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::io;
use thiserror::Error;

/// Errors raised by the handle layer.
///
/// The arena itself never produces these: it reports failure through
/// `None`, `false` or an empty byte vector, and the handle layer turns those
/// sentinels into one of the variants below.
#[derive(Debug, Error)]
pub enum Error {
    /// The handle was already released, either explicitly or by drop.
    ///
    /// This is a caller bug. No arena call is made when it is returned.
    #[error("handle has already been released")]
    InvalidHandle,

    /// The arena returned no result for a transform or query.
    #[error("{0} failed")]
    OperationFailed(&'static str),

    /// The arena could not produce a buffer (load, decode or create).
    #[error("{0} produced no image")]
    Allocation(&'static str),

    /// The capture device could not be opened.
    #[error("capture device {0} is unavailable")]
    DeviceUnavailable(i32),

    /// A single frame could not be read. The device remains usable.
    #[error("frame read missed")]
    TransientRead,

    /// The worker pool has shut down.
    #[error("worker {0}")]
    Worker(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
