// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PsywinError {
    // file errors
    #[error("{0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    ImageError(#[from] image::ImageError),
    #[error("{0}")]
    CSVError(#[from] csv::Error),
    #[error("{0}")]
    JSONError(#[from] serde_json::Error),
    #[error("Unsupported file format: {0}")]
    UnsupportedFormatError(String),

    // backend errors
    #[error("Failed to create the {backend} backend: {reason}")]
    BackendInitError { backend: String, reason: String },
    #[error("The {0} backend is not available in this build (enable the `{1}` feature)")]
    BackendUnavailableError(String, &'static str),
    #[error("`{0}` is not implemented by this backend")]
    NotImplementedError(String),
    #[error("{0}")]
    SurfaceError(#[from] wgpu::SurfaceError),

    // window errors
    #[error("Invalid window option: {0}")]
    InvalidOptionError(String),
    #[error("The window has already been closed")]
    WindowClosedError,
    #[error("The experiment was cancelled")]
    CancelledError,

    // gamma errors
    #[error("Gamma table error: {0}")]
    GammaError(String),

    // custom errors
    #[error("{0}")]
    CustomError(String),
}

impl PsywinError {
    pub(crate) fn backend_init(backend: impl ToString, reason: impl ToString) -> Self {
        PsywinError::BackendInitError {
            backend: backend.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PsywinError>;
