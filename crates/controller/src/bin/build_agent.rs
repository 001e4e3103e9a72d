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

//! Build Agent - builds one commit's image and deploys the application
//!
//! Runs inside the job submitted by the `BuildRequest` controller.

use clap::Parser;
use controller::agent::{AgentArgs, AgentCluster, BuildAgent, BuildOutcome};
use controller::CredentialResolver;
use notify::{Phase, StatusTracker};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let args = AgentArgs::parse();
    info!("Starting Build Agent v{}", env!("CARGO_PKG_VERSION"));

    let config = args.controller_config();
    let webhook_endpoint = args.webhook_endpoint.clone();
    let webhook_data = args.webhook_data.clone();

    let request = match args.into_spec() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to decode build request");
            StatusTracker::new(&webhook_endpoint, &webhook_data)
                .record(Phase::CreatedKanikoJob, false)
                .await;
            return Ok(ExitCode::FAILURE);
        }
    };

    let client = kube::Client::try_default().await?;
    let cluster = AgentCluster::from_client(&client, &config.build.namespace, &request.namespace);
    let resolver = CredentialResolver::from_config(&config);
    let agent = BuildAgent::new(cluster, resolver, config.build);

    let mut tracker = StatusTracker::new(&request.webhook_endpoint, &request.webhook_data);
    let outcome = agent.run(&request, &mut tracker).await;
    info!(?outcome, "Build Agent finished");

    Ok(match outcome {
        BuildOutcome::Succeeded => ExitCode::SUCCESS,
        BuildOutcome::BuildFailed | BuildOutcome::Halted => ExitCode::FAILURE,
    })
}
