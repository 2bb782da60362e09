// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod agents;
pub mod errors;
pub mod jobboard;
pub mod server;
pub mod tasks;

pub use errors::ApiError;
pub use server::{create_app, start_server, AppState};
pub use tasks::TaskView;
