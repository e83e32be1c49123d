// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Drone spots: data model, local mirror and background sync.

mod model;
mod remote;
mod repository;
mod sync;

pub use model::{load_csv, Spot, SpotCategory};
pub use remote::{HttpSpotsRemote, RemoteError, SpotsRemote};
pub use repository::SpotsRepository;
pub use sync::{sync_once, SpotSync};

use thiserror::Error;

/// Errors from reading or writing the local spot mirror
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid spots document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}
