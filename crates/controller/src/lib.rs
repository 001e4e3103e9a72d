/*
 * 5D Labs Deployment Platform - Controller Service
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Deployment orchestration core library
//!
//! This crate turns `BuildRequest` and `ApplicationDeployment` resources into
//! running workloads: it resolves registry and secret-store credentials,
//! synthesizes the image build job, drives the build agent through its
//! phases and reconciles application children.

pub mod agent;
pub mod credentials;
pub mod crds;
pub mod tasks;

// Re-export commonly used types
pub use crds::{
    ApplicationDeployment, ApplicationDeploymentSpec, BuildRequest, BuildRequestSpec,
};
pub use credentials::{CredentialBundle, CredentialError, CredentialResolver};
pub use tasks::config::ControllerConfig;
